use rusqlite::{params, OptionalExtension};

use super::models::{Content, Movie, NewContent, NewMovie, Seat};
use super::{SqliteStore, StoreError, StoreResult};

pub const MAX_SEAT_ROWS: u32 = 26;

impl SqliteStore {
    /// Inserts the movie and its full seat map (`A1`, `A2`, ... `B1`, ...)
    /// in one transaction.
    pub fn create_movie(&self, movie: &NewMovie) -> StoreResult<Movie> {
        if movie.title.trim().is_empty() {
            return Err(StoreError::Validation("movie title is required".into()));
        }
        if movie.ticket_price_cents <= 0 {
            return Err(StoreError::Validation(format!(
                "ticket price must be positive, got {}",
                movie.ticket_price_cents
            )));
        }
        if movie.num_rows == 0 || movie.seats_per_row == 0 {
            return Err(StoreError::Validation(
                "seat layout needs at least one row and one seat per row".into(),
            ));
        }
        if movie.num_rows > MAX_SEAT_ROWS {
            return Err(StoreError::Validation(format!(
                "seat layout supports at most {MAX_SEAT_ROWS} rows, got {}",
                movie.num_rows
            )));
        }

        let movie_id = self.write_transaction(|tx| {
            tx.execute(
                "INSERT INTO movies (title, description, show_time, ticket_price_cents, num_rows, seats_per_row)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    movie.title.trim(),
                    &movie.description,
                    movie.show_time.naive_utc(),
                    movie.ticket_price_cents,
                    movie.num_rows,
                    movie.seats_per_row,
                ],
            )?;
            let movie_id = tx.last_insert_rowid();
            let mut stmt =
                tx.prepare("INSERT INTO seats (movie_id, label, is_booked) VALUES (?1, ?2, 0)")?;
            for label in seat_labels(movie.num_rows, movie.seats_per_row) {
                stmt.execute(params![movie_id, label])?;
            }
            Ok(movie_id)
        })?;

        self.fetch_movie(movie_id)?
            .ok_or_else(|| StoreError::not_found("movie", movie_id))
    }

    pub fn fetch_movie(&self, movie_id: i64) -> StoreResult<Option<Movie>> {
        let conn = self.open()?;
        let movie = conn
            .query_row("SELECT * FROM movies WHERE id = ?1", [movie_id], |row| {
                Movie::from_row(row)
            })
            .optional()?;
        Ok(movie)
    }

    pub fn search_movies(&self, query: Option<&str>) -> StoreResult<Vec<Movie>> {
        let conn = self.open()?;
        let pattern = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", q.to_lowercase()));
        let mut stmt = conn.prepare(
            "SELECT * FROM movies
             WHERE (?1 IS NULL OR lower(title) LIKE ?1)
             ORDER BY show_time ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([pattern], |row| Movie::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_seats(&self, movie_id: i64) -> StoreResult<Vec<Seat>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM seats WHERE movie_id = ?1 ORDER BY id ASC")?;
        let rows = stmt
            .query_map([movie_id], |row| Seat::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn fetch_seat(&self, movie_id: i64, seat_id: i64) -> StoreResult<Option<Seat>> {
        let conn = self.open()?;
        let seat = conn
            .query_row(
                "SELECT * FROM seats WHERE id = ?1 AND movie_id = ?2",
                params![seat_id, movie_id],
                |row| Seat::from_row(row),
            )
            .optional()?;
        Ok(seat)
    }

    pub fn find_seat_by_label(&self, movie_id: i64, label: &str) -> StoreResult<Option<Seat>> {
        let conn = self.open()?;
        let seat = conn
            .query_row(
                "SELECT * FROM seats WHERE movie_id = ?1 AND label = ?2",
                params![movie_id, label.trim().to_uppercase()],
                |row| Seat::from_row(row),
            )
            .optional()?;
        Ok(seat)
    }

    pub fn create_content(&self, content: &NewContent) -> StoreResult<Content> {
        if content.title.trim().is_empty() {
            return Err(StoreError::Validation("content title is required".into()));
        }
        if content.duration_seconds < 0 || content.price_cents < 0 {
            return Err(StoreError::Validation(
                "duration and price cannot be negative".into(),
            ));
        }
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO content (
                title, description, category, genre, language, source_path,
                duration_seconds, price_cents, release_date
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                content.title.trim(),
                &content.description,
                content.category.as_str(),
                &content.genre,
                content.language.as_str(),
                &content.source_path,
                content.duration_seconds,
                content.price_cents,
                content.release_date,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.fetch_content(id)?
            .ok_or_else(|| StoreError::not_found("content", id))
    }

    pub fn fetch_content(&self, content_id: i64) -> StoreResult<Option<Content>> {
        let conn = self.open()?;
        let content = conn
            .query_row("SELECT * FROM content WHERE id = ?1", [content_id], |row| {
                Content::from_row(row)
            })
            .optional()?;
        Ok(content)
    }

    pub fn list_content(&self) -> StoreResult<Vec<Content>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM content ORDER BY (release_date IS NULL) ASC, release_date DESC, id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Content::from_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Records the transcoded output. Returns `false` when an output was
    /// already recorded, leaving the existing location untouched.
    pub fn set_output_location(&self, content_id: i64, location: &str) -> StoreResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE content SET output_location = ?1 WHERE id = ?2 AND output_location IS NULL",
            params![location, content_id],
        )?;
        if affected == 0 && self.fetch_content(content_id)?.is_none() {
            return Err(StoreError::not_found("content", content_id));
        }
        Ok(affected == 1)
    }

    pub fn set_duration_if_unknown(&self, content_id: i64, duration_seconds: i64) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE content SET duration_seconds = ?1 WHERE id = ?2 AND duration_seconds <= 0",
            params![duration_seconds.max(0), content_id],
        )?;
        Ok(())
    }
}

pub(crate) fn seat_labels(num_rows: u32, seats_per_row: u32) -> Vec<String> {
    let mut labels = Vec::with_capacity((num_rows * seats_per_row) as usize);
    for row in 0..num_rows.min(MAX_SEAT_ROWS) {
        let letter = char::from(b'A' + row as u8);
        for seat in 1..=seats_per_row {
            labels.push(format!("{letter}{seat}"));
        }
    }
    labels
}
