use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, TransactionStatus::Success | TransactionStatus::Failed)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Reservation,
    Subscription,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Reservation => "reservation",
            TransactionKind::Subscription => "subscription",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reservation" => Ok(TransactionKind::Reservation),
            "subscription" => Ok(TransactionKind::Subscription),
            other => Err(format!("unknown transaction kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Monthly,
    Annual,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Monthly => "monthly",
            PlanType::Annual => "annual",
        }
    }

    pub fn access_period(&self) -> Duration {
        match self {
            PlanType::Monthly => Duration::days(30),
            PlanType::Annual => Duration::days(365),
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monthly" => Ok(PlanType::Monthly),
            "annual" | "yearly" => Ok(PlanType::Annual),
            other => Err(format!("unknown subscription plan: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Category {
    Action,
    Comedy,
    Drama,
    Horror,
    Romance,
    #[serde(rename = "Sci-Fi")]
    SciFi,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Action => "Action",
            Category::Comedy => "Comedy",
            Category::Drama => "Drama",
            Category::Horror => "Horror",
            Category::Romance => "Romance",
            Category::SciFi => "Sci-Fi",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "action" => Ok(Category::Action),
            "comedy" => Ok(Category::Comedy),
            "drama" => Ok(Category::Drama),
            "horror" => Ok(Category::Horror),
            "romance" => Ok(Category::Romance),
            "sci-fi" | "scifi" => Ok(Category::SciFi),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    English,
    Amharic,
    Other,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Amharic => "amharic",
            Language::Other => "other",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "amharic" | "am" => Ok(Language::Amharic),
            "other" => Ok(Language::Other),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub show_time: DateTime<Utc>,
    pub ticket_price_cents: i64,
    pub num_rows: u32,
    pub seats_per_row: u32,
    pub created_at: Option<DateTime<Utc>>,
}

impl Movie {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let show_time: NaiveDateTime = row.get("show_time")?;
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            show_time: Utc.from_utc_datetime(&show_time),
            ticket_price_cents: row.get("ticket_price_cents")?,
            num_rows: row.get("num_rows")?,
            seats_per_row: row.get("seats_per_row")?,
            created_at: parse_timestamp(row.get("created_at")?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewMovie {
    pub title: String,
    pub description: String,
    pub show_time: DateTime<Utc>,
    pub ticket_price_cents: i64,
    pub num_rows: u32,
    pub seats_per_row: u32,
}

impl NewMovie {
    pub fn new(title: impl Into<String>, show_time: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            show_time,
            ticket_price_cents: 10000,
            num_rows: 5,
            seats_per_row: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub id: i64,
    pub movie_id: i64,
    pub label: String,
    pub is_booked: bool,
}

impl Seat {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            movie_id: row.get("movie_id")?,
            label: row.get("label")?,
            is_booked: row.get::<_, i64>("is_booked")? != 0,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub id: i64,
    pub user_name: String,
    pub email: String,
    pub movie_id: i64,
    pub seat_id: i64,
    pub paid: bool,
    pub email_sent: bool,
    pub qr_code_path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Reservation {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_name: row.get("user_name")?,
            email: row.get("email")?,
            movie_id: row.get("movie_id")?,
            seat_id: row.get("seat_id")?,
            paid: row.get::<_, i64>("paid")? != 0,
            email_sent: row.get::<_, i64>("email_sent")? != 0,
            qr_code_path: row.get("qr_code_path")?,
            created_at: parse_timestamp(row.get("created_at")?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: i64,
    pub tx_ref: String,
    pub kind: TransactionKind,
    pub reservation_id: Option<i64>,
    pub subscription_id: Option<i64>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get("kind")?;
        let status: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            tx_ref: row.get("tx_ref")?,
            kind: kind.parse().map_err(invalid_text)?,
            reservation_id: row.get("reservation_id")?,
            subscription_id: row.get("subscription_id")?,
            amount_cents: row.get("amount_cents")?,
            currency: row.get("currency")?,
            status: status.parse().map_err(invalid_text)?,
            created_at: parse_timestamp(row.get("created_at")?),
            updated_at: parse_timestamp(row.get("updated_at")?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub id: i64,
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    pub plan: PlanType,
    pub paid: bool,
    pub email_sent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub qr_code_path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let plan: String = row.get("plan")?;
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            full_name: row.get("full_name")?,
            email: row.get("email")?,
            plan: plan.parse().map_err(invalid_text)?,
            paid: row.get::<_, i64>("paid")? != 0,
            email_sent: row.get::<_, i64>("email_sent")? != 0,
            expires_at: parse_timestamp(row.get("expires_at")?),
            qr_code_path: row.get("qr_code_path")?,
            created_at: parse_timestamp(row.get("created_at")?),
        })
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.paid && self.expires_at.map(|expiry| now < expiry).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub genre: Option<String>,
    pub language: Language,
    pub source_path: Option<String>,
    pub output_location: Option<String>,
    pub duration_seconds: i64,
    pub price_cents: i64,
    pub release_date: Option<NaiveDate>,
    pub total_plays: i64,
    pub unique_viewers: i64,
    pub total_watch_seconds: f64,
    pub completion_rate: f64,
    pub average_rating: f64,
    pub rating_count: i64,
    pub created_at: Option<DateTime<Utc>>,
}

impl Content {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let category: String = row.get("category")?;
        let language: String = row.get("language")?;
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            description: row.get("description")?,
            category: category.parse().map_err(invalid_text)?,
            genre: row.get("genre")?,
            language: language.parse().map_err(invalid_text)?,
            source_path: row.get("source_path")?,
            output_location: row.get("output_location")?,
            duration_seconds: row.get("duration_seconds")?,
            price_cents: row.get("price_cents")?,
            release_date: row.get("release_date")?,
            total_plays: row.get("total_plays")?,
            unique_viewers: row.get("unique_viewers")?,
            total_watch_seconds: row.get("total_watch_seconds")?,
            completion_rate: row.get("completion_rate")?,
            average_rating: row.get("average_rating")?,
            rating_count: row.get("rating_count")?,
            created_at: parse_timestamp(row.get("created_at")?),
        })
    }

    pub fn total_watch_minutes(&self) -> i64 {
        (self.total_watch_seconds.max(0.0) / 60.0).floor() as i64
    }
}

#[derive(Debug, Clone)]
pub struct NewContent {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub genre: Option<String>,
    pub language: Language,
    pub source_path: Option<String>,
    pub duration_seconds: i64,
    pub price_cents: i64,
    pub release_date: Option<NaiveDate>,
}

impl NewContent {
    pub fn new(title: impl Into<String>, category: Category) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            category,
            genre: None,
            language: Language::English,
            source_path: None,
            duration_seconds: 0,
            price_cents: 0,
            release_date: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchLog {
    pub id: i64,
    pub user_id: String,
    pub content_id: i64,
    pub views: i64,
    pub watch_time_seconds: f64,
    pub last_viewed: Option<DateTime<Utc>>,
    pub region: Option<String>,
}

impl WatchLog {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            content_id: row.get("content_id")?,
            views: row.get("views")?,
            watch_time_seconds: row.get("watch_time_seconds")?,
            last_viewed: parse_timestamp(row.get("last_viewed")?),
            region: row.get("region")?,
        })
    }
}

pub(crate) fn parse_timestamp(value: Option<NaiveDateTime>) -> Option<DateTime<Utc>> {
    value.map(|dt| Utc.from_utc_datetime(&dt))
}

fn invalid_text(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        message.into(),
    )
}
