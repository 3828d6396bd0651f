mod error;
mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post, MethodRouter};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::analytics::AnalyticsService;
use crate::booking::BookingService;
use crate::delivery::PlaybackService;
use crate::subscription::SubscriptionService;

pub use error::{status_for, ApiError};

pub const SESSION_COOKIE: &str = "cinestream_session";
pub const SESSION_HEADER: &str = "x-session-id";
pub const USER_HEADER: &str = "x-user-id";

pub struct Services {
    pub booking: BookingService,
    pub subscriptions: SubscriptionService,
    pub playback: PlaybackService,
    pub analytics: AnalyticsService,
}

pub type AppState = Arc<Services>;

pub struct Route {
    pub method: &'static str,
    pub path: &'static str,
    pub operation: &'static str,
    build: fn() -> MethodRouter<AppState>,
}

/// Every endpoint the server exposes. The router is assembled from this
/// table once at startup and never mutated afterwards.
pub static ROUTES: &[Route] = &[
    Route {
        method: "GET",
        path: "/health",
        operation: "liveness",
        build: || get(handlers::health),
    },
    Route {
        method: "POST",
        path: "/movies/:movie_id/seats/:seat_id/reserve",
        operation: "reserve seat",
        build: || post(handlers::reserve_seat),
    },
    Route {
        method: "POST",
        path: "/payment/callback",
        operation: "verify payment (gateway callback)",
        build: || post(handlers::payment_callback),
    },
    Route {
        method: "GET",
        path: "/payment/verify",
        operation: "verify payment (return url)",
        build: || get(handlers::payment_return),
    },
    Route {
        method: "POST",
        path: "/subscriptions",
        operation: "subscribe",
        build: || post(handlers::subscribe),
    },
    Route {
        method: "GET",
        path: "/subscriptions/verify",
        operation: "verify subscription",
        build: || get(handlers::verify_subscription),
    },
    Route {
        method: "GET",
        path: "/streaming/:content_id/playback",
        operation: "signed playback url",
        build: || get(handlers::playback),
    },
    Route {
        method: "GET",
        path: "/streaming/:content_id/authorize",
        operation: "validate signed url",
        build: || get(handlers::authorize),
    },
    Route {
        method: "GET",
        path: "/streaming/keys/:content_id",
        operation: "encryption key",
        build: || get(handlers::encryption_key),
    },
    Route {
        method: "POST",
        path: "/streaming/:content_id/progress",
        operation: "report progress",
        build: || post(handlers::report_progress),
    },
    Route {
        method: "POST",
        path: "/streaming/:content_id/rate",
        operation: "rate content",
        build: || post(handlers::rate),
    },
    Route {
        method: "GET",
        path: "/analytics/export.csv",
        operation: "analytics csv export",
        build: || get(handlers::export_csv),
    },
];

pub fn router(state: AppState) -> Router {
    ROUTES
        .iter()
        .fold(Router::new(), |router, route| {
            router.route(route.path, (route.build)())
        })
        .with_state(state)
}

pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, routes = ROUTES.len(), "http server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
