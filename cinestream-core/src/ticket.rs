use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageBuffer, ImageError, Luma};
use qrcode::types::{Color, QrError};
use qrcode::QrCode;
use thiserror::Error;

use crate::error::ErrorKind;
use crate::store::{Subscription, TicketDetails};

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("qr encoding failed: {0}")]
    Encode(#[from] QrError),
    #[error("image error: {0}")]
    Image(#[from] ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TicketError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

pub type TicketResult<T> = std::result::Result<T, TicketError>;

/// A rendered QR image on disk plus its PNG bytes for mail attachments.
#[derive(Debug, Clone)]
pub struct QrArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct QrRenderer {
    output_dir: PathBuf,
    scale: u32,
    margin: u32,
}

impl QrRenderer {
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            scale: 8,
            margin: 4,
        }
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = scale.max(1);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn reservation(&self, details: &TicketDetails) -> TicketResult<QrArtifact> {
        self.render(
            &reservation_payload(details),
            &format!("reservation_{}.png", details.reservation.id),
        )
    }

    pub fn subscription(&self, subscription: &Subscription) -> TicketResult<QrArtifact> {
        self.render(
            &subscription_payload(subscription),
            &format!("subscription_{}.png", subscription.id),
        )
    }

    pub fn render(&self, payload: &str, file_name: &str) -> TicketResult<QrArtifact> {
        let code = QrCode::new(payload.as_bytes())?;
        let module_count = code.width() as u32;
        let image_size = (module_count + self.margin * 2) * self.scale;
        let mut img = ImageBuffer::from_pixel(image_size, image_size, Luma([255u8]));
        let colors = code.to_colors();

        for y in 0..module_count {
            for x in 0..module_count {
                let index = (y * module_count + x) as usize;
                if colors[index] == Color::Dark {
                    let x0 = (x + self.margin) * self.scale;
                    let y0 = (y + self.margin) * self.scale;
                    for dy in 0..self.scale {
                        for dx in 0..self.scale {
                            img.put_pixel(x0 + dx, y0 + dy, Luma([0u8]));
                        }
                    }
                }
            }
        }

        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(file_name);
        img.save(&path)?;
        let png = fs::read(&path)?;
        Ok(QrArtifact {
            path,
            file_name: file_name.to_string(),
            png,
        })
    }
}

pub fn reservation_payload(details: &TicketDetails) -> String {
    format!(
        "Reservation ID: {} | Movie: {} | Seat: {} | Name: {} | Email: {}",
        details.reservation.id,
        details.movie_title,
        details.seat_label,
        details.reservation.user_name,
        details.reservation.email
    )
}

pub fn subscription_payload(subscription: &Subscription) -> String {
    let expires = subscription
        .expires_at
        .map(|at| at.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "pending".to_string());
    format!(
        "Subscription ID: {} | Plan: {} | Name: {} | Email: {} | Expires: {}",
        subscription.id, subscription.plan, subscription.full_name, subscription.email, expires
    )
}
