use super::{ImageProvider, Provider};
use crate::error::ProviderError;
use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;

const WIDTH: u32 = 512;
const HEIGHT: u32 = 384;

/// Local, network-free illustration stand-in: a soft vertical gradient
/// whose two colours are taken from the prompt digest.
pub struct PlaceholderImages;

impl PlaceholderImages {
    pub fn new() -> Self {
        Self
    }

    /// Pastel colour pair derived from the prompt.
    pub fn palette(prompt: &str) -> (Rgb<u8>, Rgb<u8>) {
        let digest = Sha256::digest(prompt.as_bytes());
        let soften = |b: u8| 150 + (b % 100);
        (
            Rgb([soften(digest[0]), soften(digest[1]), soften(digest[2])]),
            Rgb([soften(digest[3]), soften(digest[4]), soften(digest[5])]),
        )
    }

    pub fn draw(prompt: &str) -> Result<Vec<u8>, ProviderError> {
        let (top, bottom) = Self::palette(prompt);
        let img = RgbImage::from_fn(WIDTH, HEIGHT, |_, y| {
            let t = y as f32 / (HEIGHT - 1) as f32;
            let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
            Rgb([mix(top[0], bottom[0]), mix(top[1], bottom[1]), mix(top[2], bottom[2])])
        });

        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| ProviderError::Malformed(format!("placeholder: {}", e)))?;
        Ok(bytes)
    }
}

impl Default for PlaceholderImages {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for PlaceholderImages {
    fn id(&self) -> &'static str {
        "placeholder"
    }
}

#[async_trait]
impl ImageProvider for PlaceholderImages {
    async fn render(&self, prompt: &str) -> Result<Vec<u8>, ProviderError> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || Self::draw(&prompt))
            .await
            .map_err(|e| ProviderError::Transient(format!("placeholder task failed: {}", e)))?
    }
}
