pub mod analytics;
pub mod booking;
pub mod catalog;
pub mod config;
pub mod delivery;
pub mod error;
pub mod http;
pub mod jobs;
pub mod mail;
pub mod media;
pub mod payment;
pub mod sqlite;
pub mod store;
pub mod subscription;
pub mod ticket;

pub use analytics::{
    AnalyticsError, AnalyticsResult, AnalyticsService, AnalyticsSummary, ProgressEvent,
    ProgressReport, ProgressResponse, RatingSummary,
};
pub use booking::{
    BookingError, BookingResult, BookingService, Buyer, CheckoutSettings, ReservationCheckout,
    VerificationResult,
};
pub use catalog::CatalogService;
pub use config::{load_cinestream_config, CinestreamConfig};
pub use delivery::{
    DeliveryError, DeliveryResult, PlaybackGrant, PlaybackService, SignedUrl, SigningError,
    UrlSigner,
};
pub use error::{ConfigError, ErrorKind, Result};
pub use jobs::{JobError, JobReport, JobResult, TranscodeWorker, WorkerSummary};
pub use mail::{EmailMessage, LogMailer, MailError, Mailer, SmtpMailer};
pub use media::{
    CommandExecutor, MediaError, MediaSettings, SystemCommandExecutor, TranscodeOutcome,
    Transcoder,
};
pub use payment::{ChapaGateway, GatewayError, GatewayVerdict, PaymentGateway};
pub use store::{SqliteStore, SqliteStoreBuilder, StoreError, StoreResult};
pub use subscription::{PlanPricing, SubscriptionService};
pub use ticket::{QrArtifact, QrRenderer, TicketError};
