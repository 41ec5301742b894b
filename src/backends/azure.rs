use super::{check_status, AudioProvider, Provider, SpeechJob};
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;

pub struct AzureSpeech {
    client: Client,
    endpoint: String,
    key: String,
}

impl AzureSpeech {
    pub fn new(client: Client, key: &str, region: &str) -> Self {
        let endpoint = format!("https://{}.tts.speech.microsoft.com/cognitiveservices/v1", region);
        Self::with_endpoint(client, &endpoint, key)
    }

    pub fn with_endpoint(client: Client, endpoint: &str, key: &str) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            key: key.to_string(),
        }
    }

    /// Relative prosody rate: 0.8 -> "-20%", 1.25 -> "+25%".
    pub fn rate_percent(speed: f32) -> String {
        let pct = ((speed - 1.0) * 100.0).round() as i32;
        if pct >= 0 {
            format!("+{}%", pct)
        } else {
            format!("{}%", pct)
        }
    }

    pub fn voice_for(language: &str, preset: &str) -> &'static str {
        match language {
            "hi" => "hi-IN-SwaraNeural",
            "es" => "es-ES-ElviraNeural",
            "fr" => "fr-FR-DeniseNeural",
            "de" => "de-DE-KatjaNeural",
            "ta" => "ta-IN-PallaviNeural",
            "te" => "te-IN-ShrutiNeural",
            _ => match preset {
                "aria" => "en-US-AriaNeural",
                "alloy" => "en-US-GuyNeural",
                _ => "en-US-AnaNeural",
            },
        }
    }

    pub fn ssml(job: &SpeechJob) -> String {
        let voice = Self::voice_for(&job.language, &job.voice);
        // Locale is the voice name's first two segments
        let locale: String = voice.splitn(3, '-').take(2).collect::<Vec<_>>().join("-");
        format!(
            "<speak version='1.0' xml:lang='{locale}'><voice name='{voice}'><prosody rate='{rate}'>{text}</prosody></voice></speak>",
            locale = locale,
            voice = voice,
            rate = Self::rate_percent(job.speed),
            text = escape_xml(&job.text),
        )
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

impl Provider for AzureSpeech {
    fn id(&self) -> &'static str {
        "azure"
    }
}

#[async_trait]
impl AudioProvider for AzureSpeech {
    async fn synthesize(&self, job: &SpeechJob) -> Result<Vec<u8>, ProviderError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", "riff-24khz-16bit-mono-pcm")
            .header("User-Agent", "readalong")
            .body(Self::ssml(job))
            .send()
            .await?;

        let bytes = check_status("azure", resp).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::Malformed("azure: empty audio body".into()));
        }
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(text: &str, language: &str, speed: f32) -> SpeechJob {
        SpeechJob {
            text: text.into(),
            language: language.into(),
            voice: "ana".into(),
            speed,
        }
    }

    #[test]
    fn test_rate_percent() {
        assert_eq!(AzureSpeech::rate_percent(0.8), "-20%");
        assert_eq!(AzureSpeech::rate_percent(1.0), "+0%");
        assert_eq!(AzureSpeech::rate_percent(1.25), "+25%");
    }

    #[test]
    fn test_ssml_escapes_and_picks_voice() {
        let ssml = AzureSpeech::ssml(&job("Tom & Jerry", "en", 0.8));
        assert!(ssml.contains("en-US-AnaNeural"));
        assert!(ssml.contains("xml:lang='en-US'"));
        assert!(ssml.contains("Tom &amp; Jerry"));
        assert!(ssml.contains("rate='-20%'"));

        let ssml = AzureSpeech::ssml(&job("नमस्ते", "hi", 1.0));
        assert!(ssml.contains("hi-IN-SwaraNeural"));
    }

    #[tokio::test]
    async fn test_synthesize_posts_ssml() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tts")
            .match_header("ocp-apim-subscription-key", "az")
            .match_body(mockito::Matcher::Regex("prosody".into()))
            .with_status(200)
            .with_body("RIFF....WAVE")
            .create_async()
            .await;

        let endpoint = format!("{}/tts", server.url());
        let azure = AzureSpeech::with_endpoint(Client::new(), &endpoint, "az");
        let bytes = azure.synthesize(&job("Hello.", "en", 1.0)).await.unwrap();
        assert!(bytes.starts_with(b"RIFF"));
        mock.assert_async().await;
    }
}
