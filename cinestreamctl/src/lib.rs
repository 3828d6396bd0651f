use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use cinestream_core::http::{self, Services, ROUTES};
use cinestream_core::store::{
    Category, Content, JobFilter, JobStatus, Language, Movie, NewContent, NewMovie, Seat,
    TranscodeJob, TransactionKind,
};
use cinestream_core::subscription::SubscriptionVerification;
use cinestream_core::{
    load_cinestream_config, AnalyticsError, AnalyticsService, AnalyticsSummary, BookingError,
    BookingService, CatalogService, ChapaGateway, CheckoutSettings, CinestreamConfig, ConfigError,
    GatewayError, JobError, LogMailer, MailError, Mailer, MediaSettings, PaymentGateway,
    PlanPricing, PlaybackService, QrRenderer, SignedUrl, SigningError, SmtpMailer, SqliteStore,
    StoreError, SubscriptionService, TranscodeWorker, Transcoder, UrlSigner, VerificationResult,
    WorkerSummary,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Store(#[from] StoreError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Booking(#[from] BookingError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("mail error: {0}")]
    Mail(#[from] MailError),
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),
    #[error("analytics error: {0}")]
    Analytics(#[from] AnalyticsError),
    #[error("worker error: {0}")]
    Job(#[from] JobError),
    #[error("authentication failed")]
    Authentication,
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Cinestream command-line control interface", long_about = None)]
pub struct Cli {
    /// Caminho do cinestream.toml principal
    #[arg(long, default_value = "configs/cinestream.toml")]
    pub config: PathBuf,
    /// Diretório base override (substitui paths.base_dir)
    #[arg(long)]
    pub base_dir: Option<PathBuf>,
    /// Caminho alternativo para cinema.sqlite
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Token para autenticação local (se CINESTREAMCTL_TOKEN estiver definido)
    #[arg(long)]
    pub token: Option<String>,
    /// Formato de saída
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Cria diretórios e aplica o schema do banco
    Init,
    /// Catálogo de filmes em cartaz
    #[command(subcommand)]
    Movie(MovieCommands),
    /// Catálogo de conteúdo sob demanda
    #[command(subcommand)]
    Content(ContentCommands),
    /// Worker de transcodificação
    #[command(subcommand)]
    Worker(WorkerCommands),
    /// Fila de jobs de transcodificação
    #[command(subcommand)]
    Jobs(JobCommands),
    /// Relatórios e manutenção de analytics
    #[command(subcommand)]
    Analytics(AnalyticsCommands),
    /// Gera uma URL de reprodução assinada
    Sign(SignArgs),
    /// Verificação de pagamentos no gateway
    #[command(subcommand)]
    Payment(PaymentCommands),
    /// Assinaturas de streaming
    #[command(subcommand)]
    Subscription(SubscriptionCommands),
    /// Sobe o servidor HTTP
    Serve(ServeArgs),
}

#[derive(Subcommand, Debug)]
pub enum MovieCommands {
    /// Cadastra um filme e gera o mapa de assentos
    Add(MovieAddArgs),
    /// Busca filmes pelo título
    Search(MovieSearchArgs),
    /// Mostra o mapa de assentos de um filme
    Seats(MovieSeatsArgs),
}

#[derive(Args, Debug)]
pub struct MovieAddArgs {
    /// Título do filme
    pub title: String,
    /// Horário da sessão (RFC 3339)
    #[arg(long)]
    pub show_time: DateTime<Utc>,
    /// Preço do ingresso em centavos
    #[arg(long, default_value_t = 10_000)]
    pub price_cents: i64,
    /// Número de fileiras (A..Z)
    #[arg(long, default_value_t = 5)]
    pub rows: u32,
    /// Assentos por fileira
    #[arg(long, default_value_t = 10)]
    pub seats_per_row: u32,
    /// Sinopse
    #[arg(long, default_value = "")]
    pub description: String,
}

#[derive(Args, Debug)]
pub struct MovieSearchArgs {
    /// Trecho do título (sem filtro quando omitido)
    pub query: Option<String>,
}

#[derive(Args, Debug)]
pub struct MovieSeatsArgs {
    pub movie_id: i64,
}

#[derive(Subcommand, Debug)]
pub enum ContentCommands {
    /// Cadastra conteúdo e enfileira a transcodificação
    Add(ContentAddArgs),
    /// Lista o conteúdo com seus agregados
    List,
}

#[derive(Args, Debug)]
pub struct ContentAddArgs {
    /// Título do conteúdo
    pub title: String,
    /// Categoria (Action, Comedy, Drama, Horror, Romance, Sci-Fi)
    #[arg(long)]
    pub category: Category,
    /// Idioma (english, amharic, other)
    #[arg(long, default_value = "english")]
    pub language: Language,
    #[arg(long)]
    pub genre: Option<String>,
    /// Arquivo de vídeo de origem
    #[arg(long)]
    pub source: Option<PathBuf>,
    /// Duração em segundos (0 = desconhecida, preenchida pelo probe)
    #[arg(long, default_value_t = 0)]
    pub duration: i64,
    #[arg(long, default_value_t = 0)]
    pub price_cents: i64,
    /// Data de lançamento (AAAA-MM-DD)
    #[arg(long)]
    pub release_date: Option<NaiveDate>,
    #[arg(long, default_value = "")]
    pub description: String,
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommands {
    /// Processa a fila de transcodificação
    Run(WorkerRunArgs),
}

#[derive(Args, Debug)]
pub struct WorkerRunArgs {
    /// Esvazia a fila uma vez e sai
    #[arg(long, default_value_t = false)]
    pub once: bool,
    /// Intervalo entre consultas à fila, em segundos
    #[arg(long, default_value_t = 10)]
    pub poll_seconds: u64,
}

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// Lista jobs de transcodificação
    List(JobListArgs),
    /// Reenfileira jobs que falharam
    Retry(JobRetryArgs),
}

#[derive(Args, Debug)]
pub struct JobListArgs {
    /// Filtrar por status (queued, running, done, failed)
    #[arg(long)]
    pub status: Option<JobStatus>,
    /// Limite de registros
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct JobRetryArgs {
    /// Apenas o job deste conteúdo
    #[arg(long)]
    pub content_id: Option<i64>,
    /// Também reenfileira jobs em execução parados há mais de N minutos
    #[arg(long, default_value_t = 120)]
    pub stale_minutes: i64,
}

#[derive(Subcommand, Debug)]
pub enum AnalyticsCommands {
    /// Totais do site
    Summary,
    /// Exporta analytics por conteúdo em CSV
    Export(ExportArgs),
    /// Recalcula os agregados a partir dos logs
    Reconcile(ReconcileArgs),
    /// Remove estado de sessão antigo
    PurgeSessions(PurgeArgs),
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Arquivo de saída (stdout quando omitido)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Apenas este conteúdo (todos quando omitido)
    #[arg(long)]
    pub content_id: Option<i64>,
}

#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// Idade mínima, em dias, do estado removido
    #[arg(long, default_value_t = 30)]
    pub days: i64,
}

#[derive(Args, Debug)]
pub struct SignArgs {
    /// Identificador do asset coberto pela assinatura
    pub asset_id: String,
    /// URL base do manifesto
    pub base_url: String,
    /// Validade em segundos (padrão: signing.ttl_seconds)
    #[arg(long)]
    pub ttl: Option<i64>,
}

#[derive(Subcommand, Debug)]
pub enum PaymentCommands {
    /// Confirma um pagamento pelo tx_ref
    Verify(ReferenceArgs),
}

#[derive(Subcommand, Debug)]
pub enum SubscriptionCommands {
    /// Confirma o pagamento de uma assinatura
    Verify(ReferenceArgs),
    /// Informa se o usuário tem acesso ao streaming
    Access(AccessArgs),
}

#[derive(Args, Debug)]
pub struct ReferenceArgs {
    pub tx_ref: String,
}

#[derive(Args, Debug)]
pub struct AccessArgs {
    pub user_id: String,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Endereço de escuta (padrão: server.bind)
    #[arg(long)]
    pub bind: Option<String>,
    /// Não inicia o worker de transcodificação junto com o servidor
    #[arg(long, default_value_t = false)]
    pub without_worker: bool,
    #[arg(long, default_value_t = 10)]
    pub poll_seconds: u64,
}

pub async fn run(cli: Cli) -> Result<()> {
    enforce_token(&cli)?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Init => render(&context.init()?, cli.format)?,
        Commands::Movie(MovieCommands::Add(args)) => {
            render(&context.movie_add(args)?, cli.format)?
        }
        Commands::Movie(MovieCommands::Search(args)) => {
            render(&context.movie_search(args)?, cli.format)?
        }
        Commands::Movie(MovieCommands::Seats(args)) => {
            render(&context.movie_seats(args)?, cli.format)?
        }
        Commands::Content(ContentCommands::Add(args)) => {
            render(&context.content_add(args)?, cli.format)?
        }
        Commands::Content(ContentCommands::List) => {
            render(&context.content_list()?, cli.format)?
        }
        Commands::Worker(WorkerCommands::Run(args)) => {
            if let Some(summary) = context.worker_run(args).await? {
                render(&summary, cli.format)?;
            }
        }
        Commands::Jobs(JobCommands::List(args)) => render(&context.jobs_list(args)?, cli.format)?,
        Commands::Jobs(JobCommands::Retry(args)) => {
            render(&context.jobs_retry(args)?, cli.format)?
        }
        Commands::Analytics(AnalyticsCommands::Summary) => {
            render(&context.analytics_summary()?, cli.format)?
        }
        Commands::Analytics(AnalyticsCommands::Export(args)) => {
            let report = context.analytics_export(args)?;
            if args.output.is_some() {
                render(&report, cli.format)?;
            }
        }
        Commands::Analytics(AnalyticsCommands::Reconcile(args)) => {
            render(&context.analytics_reconcile(args)?, cli.format)?
        }
        Commands::Analytics(AnalyticsCommands::PurgeSessions(args)) => {
            render(&context.purge_sessions(args)?, cli.format)?
        }
        Commands::Sign(args) => render(&context.sign(args)?, cli.format)?,
        Commands::Payment(PaymentCommands::Verify(args)) => {
            render(&context.payment_verify(&args.tx_ref).await?, cli.format)?
        }
        Commands::Subscription(SubscriptionCommands::Verify(args)) => {
            let verification = context
                .subscriptions()?
                .verify_subscription(&args.tx_ref)
                .await?;
            render(&PaymentOutcome::Subscription(verification), cli.format)?
        }
        Commands::Subscription(SubscriptionCommands::Access(args)) => {
            render(&context.subscription_access(args)?, cli.format)?
        }
        Commands::Serve(args) => {
            if matches!(cli.format, OutputFormat::Text) {
                println!("{}", route_table());
            }
            context.serve(args).await?
        }
    }

    Ok(())
}

fn enforce_token(cli: &Cli) -> Result<()> {
    if let Ok(expected) = std::env::var("CINESTREAMCTL_TOKEN") {
        match &cli.token {
            Some(provided) if provided == &expected => Ok(()),
            _ => Err(AppError::Authentication),
        }
    } else {
        Ok(())
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: CinestreamConfig,
    store: SqliteStore,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_cinestream_config(&cli.config)?;
        if let Some(base_dir) = &cli.base_dir {
            config.paths.base_dir = base_dir.display().to_string();
        }
        let database = cli
            .database
            .clone()
            .unwrap_or_else(|| config.database_path());
        if let Some(parent) = database.parent() {
            fs::create_dir_all(parent)?;
        }
        let store = SqliteStore::builder().path(&database).build()?;
        Ok(Self { config, store })
    }

    fn init(&self) -> Result<InitReport> {
        let directories = vec![
            self.config.media_root(),
            self.config.media_root().join("hls"),
            self.config.key_store(),
            self.config.qr_dir(),
            self.config.resolve_path(&self.config.paths.logs_dir),
        ];
        for dir in &directories {
            fs::create_dir_all(dir)?;
        }
        self.store.initialize()?;
        info!(database = %self.store.path().display(), "schema applied");
        Ok(InitReport {
            database: self.store.path().to_path_buf(),
            directories,
        })
    }

    fn catalog(&self) -> CatalogService {
        CatalogService::new(self.store.clone())
    }

    fn movie_add(&self, args: &MovieAddArgs) -> Result<Movie> {
        if args.rows > self.config.booking.max_rows {
            return Err(StoreError::Validation(format!(
                "at most {} rows are allowed",
                self.config.booking.max_rows
            ))
            .into());
        }
        let mut movie = NewMovie::new(&args.title, args.show_time);
        movie.description = args.description.clone();
        movie.ticket_price_cents = args.price_cents;
        movie.num_rows = args.rows;
        movie.seats_per_row = args.seats_per_row;
        Ok(self.catalog().create_movie(&movie)?)
    }

    fn movie_search(&self, args: &MovieSearchArgs) -> Result<Vec<Movie>> {
        Ok(self.catalog().search_movies(args.query.as_deref())?)
    }

    fn movie_seats(&self, args: &MovieSeatsArgs) -> Result<SeatMap> {
        let movie = self
            .store
            .fetch_movie(args.movie_id)?
            .ok_or_else(|| AppError::MissingResource(format!("filme {}", args.movie_id)))?;
        let seats = self.catalog().list_seats(movie.id)?;
        Ok(SeatMap { movie, seats })
    }

    fn content_add(&self, args: &ContentAddArgs) -> Result<Content> {
        let mut content = NewContent::new(&args.title, args.category);
        content.description = args.description.clone();
        content.language = args.language;
        content.genre = args.genre.clone();
        content.source_path = args.source.as_ref().map(|path| path.display().to_string());
        content.duration_seconds = args.duration;
        content.price_cents = args.price_cents;
        content.release_date = args.release_date;
        Ok(self.catalog().create_content(&content)?)
    }

    fn content_list(&self) -> Result<Vec<Content>> {
        Ok(self.catalog().list_content()?)
    }

    fn worker(&self) -> TranscodeWorker {
        let transcoder = Transcoder::new(
            self.store.clone(),
            MediaSettings::from_config(&self.config),
            None,
        );
        TranscodeWorker::new(self.store.clone(), Arc::new(transcoder))
    }

    async fn worker_run(&self, args: &WorkerRunArgs) -> Result<Option<WorkerSummary>> {
        let worker = self.worker();
        if args.once {
            return Ok(Some(worker.run_pending().await?));
        }
        info!(poll_seconds = args.poll_seconds, "transcode worker started");
        worker
            .run_forever(Duration::from_secs(args.poll_seconds.max(1)), async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        info!("transcode worker stopped");
        Ok(None)
    }

    fn jobs_list(&self, args: &JobListArgs) -> Result<JobList> {
        let rows = self.store.list_jobs(&JobFilter {
            status: args.status,
            limit: Some(args.limit),
        })?;
        Ok(JobList { rows })
    }

    fn jobs_retry(&self, args: &JobRetryArgs) -> Result<RequeueReport> {
        let requeued = self.store.requeue_failed(args.content_id)?;
        let cutoff = Utc::now() - chrono::Duration::minutes(args.stale_minutes.max(0));
        let stale = self.store.requeue_stale(cutoff, args.content_id)?;
        Ok(RequeueReport { requeued, stale })
    }

    fn analytics(&self) -> AnalyticsService {
        AnalyticsService::new(self.store.clone())
    }

    fn analytics_summary(&self) -> Result<AnalyticsSummary> {
        Ok(self.analytics().summary()?)
    }

    fn analytics_export(&self, args: &ExportArgs) -> Result<ExportReport> {
        let rows = match &args.output {
            Some(path) => {
                let file = fs::File::create(path)?;
                self.analytics().export_csv(file)?
            }
            None => self.analytics().export_csv(std::io::stdout().lock())?,
        };
        Ok(ExportReport {
            rows,
            output: args.output.clone(),
        })
    }

    fn analytics_reconcile(&self, args: &ReconcileArgs) -> Result<ReconcileReport> {
        let reconciled = match args.content_id {
            Some(id) => {
                self.analytics().reconcile(id)?;
                1
            }
            None => self.analytics().reconcile_all()?,
        };
        Ok(ReconcileReport { reconciled })
    }

    fn purge_sessions(&self, args: &PurgeArgs) -> Result<PurgeReport> {
        let cutoff = Utc::now() - chrono::Duration::days(args.days.max(0));
        let removed = self.store.purge_sessions(cutoff)?;
        Ok(PurgeReport { removed })
    }

    fn signer(&self) -> Result<UrlSigner> {
        Ok(UrlSigner::new(
            self.config.signing_secret()?,
            self.config.signing.ttl_seconds,
        )?)
    }

    fn sign(&self, args: &SignArgs) -> Result<SignedUrl> {
        let signer = self.signer()?;
        let ttl = args.ttl.unwrap_or_else(|| signer.ttl_seconds());
        Ok(signer.sign_with_ttl(&args.asset_id, &args.base_url, ttl)?)
    }

    fn gateway(&self) -> Result<Arc<dyn PaymentGateway>> {
        let secret = self.config.gateway_secret()?;
        Ok(Arc::new(ChapaGateway::from_config(
            &self.config.gateway,
            secret,
        )?))
    }

    fn mailer(&self) -> Result<Arc<dyn Mailer>> {
        if self.config.mail.enabled {
            Ok(Arc::new(SmtpMailer::from_config(&self.config.mail)?))
        } else {
            Ok(Arc::new(LogMailer))
        }
    }

    fn booking_with(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> BookingService {
        BookingService::new(
            self.store.clone(),
            gateway,
            mailer,
            QrRenderer::new(self.config.qr_dir()),
            CheckoutSettings::from_config(&self.config),
        )
    }

    fn subscriptions_with(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> SubscriptionService {
        SubscriptionService::new(
            self.store.clone(),
            gateway,
            mailer,
            QrRenderer::new(self.config.qr_dir()),
            CheckoutSettings::from_config(&self.config),
            PlanPricing::from(&self.config.subscription),
        )
    }

    fn subscriptions(&self) -> Result<SubscriptionService> {
        Ok(self.subscriptions_with(self.gateway()?, self.mailer()?))
    }

    /// Settles either kind of transaction; the reference decides which flow
    /// runs.
    async fn payment_verify(&self, tx_ref: &str) -> Result<PaymentOutcome> {
        let transaction = self
            .store
            .fetch_transaction(tx_ref)?
            .ok_or_else(|| AppError::MissingResource(format!("transação {tx_ref}")))?;
        let gateway = self.gateway()?;
        let mailer = self.mailer()?;
        match transaction.kind {
            TransactionKind::Reservation => Ok(PaymentOutcome::Reservation(
                self.booking_with(gateway, mailer)
                    .verify_payment(tx_ref)
                    .await?,
            )),
            TransactionKind::Subscription => Ok(PaymentOutcome::Subscription(
                self.subscriptions_with(gateway, mailer)
                    .verify_subscription(tx_ref)
                    .await?,
            )),
        }
    }

    fn subscription_access(&self, args: &AccessArgs) -> Result<AccessReport> {
        let subscription = self.store.active_subscription(&args.user_id, Utc::now())?;
        Ok(AccessReport {
            user_id: args.user_id.clone(),
            has_access: subscription.is_some(),
            expires_at: subscription.and_then(|sub| sub.expires_at),
        })
    }

    fn services(&self) -> Result<Services> {
        let gateway = self.gateway()?;
        let mailer = self.mailer()?;
        Ok(Services {
            booking: self.booking_with(gateway.clone(), mailer.clone()),
            subscriptions: self.subscriptions_with(gateway, mailer),
            playback: PlaybackService::new(
                self.store.clone(),
                self.signer()?,
                self.config.signing.media_base_url.clone(),
                self.config.key_store(),
            ),
            analytics: self.analytics(),
        })
    }

    async fn serve(&self, args: &ServeArgs) -> Result<()> {
        self.store.initialize()?;
        let state = Arc::new(self.services()?);
        let bind = args
            .bind
            .clone()
            .unwrap_or_else(|| self.config.server.bind.clone());
        let listener = TcpListener::bind(&bind).await?;

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let worker_task = if args.without_worker {
            None
        } else {
            let worker = self.worker();
            let poll = Duration::from_secs(args.poll_seconds.max(1));
            let mut stop_rx = stop_rx;
            Some(tokio::spawn(async move {
                worker
                    .run_forever(poll, async move {
                        let _ = stop_rx.changed().await;
                    })
                    .await;
            }))
        };

        http::serve(listener, state, async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            let _ = stop_tx.send(true);
        })
        .await?;

        if let Some(task) = worker_task {
            let _ = task.await;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct InitReport {
    pub database: PathBuf,
    pub directories: Vec<PathBuf>,
}

impl DisplayFallback for InitReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Banco inicializado: {}", self.database.display())];
        for dir in &self.directories {
            lines.push(format!("  - {}", dir.display()));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Movie {
    fn display(&self) -> String {
        format!(
            "#{} {} | sessão={} | ingresso={} | assentos={}x{}",
            self.id,
            self.title,
            self.show_time.to_rfc3339(),
            cents(self.ticket_price_cents),
            self.num_rows,
            self.seats_per_row
        )
    }
}

impl DisplayFallback for Vec<Movie> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "Nenhum filme encontrado".to_string();
        }
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct SeatMap {
    pub movie: Movie,
    pub seats: Vec<Seat>,
}

impl DisplayFallback for SeatMap {
    fn display(&self) -> String {
        let mut lines = vec![format!("{} (#{})", self.movie.title, self.movie.id)];
        let mut current_row = String::new();
        let mut row = Vec::new();
        for seat in &self.seats {
            let row_label: String = seat.label.chars().take_while(char::is_ascii_alphabetic).collect();
            if row_label != current_row && !row.is_empty() {
                lines.push(format!("  {current_row}: {}", row.join(" ")));
                row.clear();
            }
            current_row = row_label;
            let mark = if seat.is_booked { "x" } else { " " };
            row.push(format!("{}[{mark}]", seat.label));
        }
        if !row.is_empty() {
            lines.push(format!("  {current_row}: {}", row.join(" ")));
        }
        let free = self.seats.iter().filter(|seat| !seat.is_booked).count();
        lines.push(format!("Livres: {free}/{}", self.seats.len()));
        lines.join("\n")
    }
}

impl DisplayFallback for Content {
    fn display(&self) -> String {
        let output = self
            .output_location
            .as_deref()
            .unwrap_or(if self.source_path.is_some() {
                "<transcodificação pendente>"
            } else {
                "<sem mídia>"
            });
        format!(
            "#{} {} [{}] | views={} viewers={} watch={:.1} min | completion={:.2}% | rating={:.2} ({}) | {}",
            self.id,
            self.title,
            self.category,
            self.total_plays,
            self.unique_viewers,
            self.total_watch_seconds / 60.0,
            self.completion_rate,
            self.average_rating,
            self.rating_count,
            output
        )
    }
}

impl DisplayFallback for Vec<Content> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "Nenhum conteúdo cadastrado".to_string();
        }
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for WorkerSummary {
    fn display(&self) -> String {
        format!(
            "Jobs processados: {} (ok: {}, falhas: {})",
            self.processed, self.succeeded, self.failed
        )
    }
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub rows: Vec<TranscodeJob>,
}

impl DisplayFallback for JobList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "Fila vazia".to_string();
        }
        let mut lines = Vec::new();
        for job in &self.rows {
            let error = job
                .last_error
                .as_deref()
                .map(|err| format!(" erro={err}"))
                .unwrap_or_default();
            lines.push(format!(
                "#{id} content={content} status={status} tentativas={attempts}{error}",
                id = job.id,
                content = job.content_id,
                status = job.status,
                attempts = job.attempts,
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RequeueReport {
    pub requeued: usize,
    pub stale: usize,
}

impl DisplayFallback for RequeueReport {
    fn display(&self) -> String {
        format!(
            "Jobs reenfileirados: {} (com falha) / {} (parados)",
            self.requeued, self.stale
        )
    }
}

impl DisplayFallback for AnalyticsSummary {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Views: {}", self.total_views),
            format!("Espectadores únicos: {}", self.unique_viewers),
            format!("Horas assistidas: {:.2} h", self.total_watch_hours),
            format!("Média por view: {:.2} min", self.average_watch_minutes_per_view),
            format!("Conclusão: {:.2}%", self.completion_rate),
        ];
        if !self.top_regions.is_empty() {
            lines.push("Regiões:".to_string());
            for region in &self.top_regions {
                lines.push(format!("  - {}: {:.2}%", region.region, region.percent));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct ExportReport {
    pub rows: usize,
    pub output: Option<PathBuf>,
}

impl DisplayFallback for ExportReport {
    fn display(&self) -> String {
        match &self.output {
            Some(path) => format!("{} linhas exportadas para {}", self.rows, path.display()),
            None => format!("{} linhas exportadas", self.rows),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReconcileReport {
    pub reconciled: usize,
}

impl DisplayFallback for ReconcileReport {
    fn display(&self) -> String {
        format!("Conteúdos recalculados: {}", self.reconciled)
    }
}

#[derive(Debug, Serialize)]
pub struct PurgeReport {
    pub removed: usize,
}

impl DisplayFallback for PurgeReport {
    fn display(&self) -> String {
        format!("Sessões removidas: {}", self.removed)
    }
}

impl DisplayFallback for SignedUrl {
    fn display(&self) -> String {
        match self.expires {
            Some(expires) => format!("{} (expira em {expires})", self.url),
            None => format!("{} (arquivo único, sem assinatura)", self.url),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Reservation(VerificationResult),
    Subscription(SubscriptionVerification),
}

impl DisplayFallback for PaymentOutcome {
    fn display(&self) -> String {
        match self {
            PaymentOutcome::Reservation(result) => format!(
                "Reserva #{} | {} | status={} | ingresso: {}",
                result.reservation_id,
                result.tx_ref,
                result.status,
                result.ticket_url
            ),
            PaymentOutcome::Subscription(result) => format!(
                "Assinatura #{} ({}) | {} | status={} | expira={}",
                result.subscription_id,
                result.plan,
                result.tx_ref,
                result.status,
                result
                    .expires_at
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string())
            ),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccessReport {
    pub user_id: String,
    pub has_access: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DisplayFallback for AccessReport {
    fn display(&self) -> String {
        match (self.has_access, self.expires_at) {
            (true, Some(expires)) => {
                format!("{}: acesso ativo até {}", self.user_id, expires.to_rfc3339())
            }
            _ => format!("{}: sem assinatura ativa", self.user_id),
        }
    }
}

/// One line per HTTP route, printed when the server starts.
pub fn route_table() -> String {
    ROUTES
        .iter()
        .map(|route| format!("{:<6} {:<44} {}", route.method, route.path, route.operation))
        .collect::<Vec<_>>()
        .join("\n")
}

fn cents(amount: i64) -> String {
    format!("{}.{:02}", amount / 100, (amount % 100).abs())
}
