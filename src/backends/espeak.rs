use super::{AudioProvider, Provider, SpeechJob};
use crate::error::ProviderError;
use async_trait::async_trait;
use std::time::Duration;

/// espeak-ng's default speaking rate in words per minute.
const BASE_WPM: f32 = 175.0;

pub struct EspeakBackend {
    binary: String,
    max_wait: Duration,
}

impl EspeakBackend {
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
            max_wait: Duration::from_secs(30),
        }
    }

    /// Relative speed to espeak's `-s` words-per-minute.
    pub fn words_per_minute(speed: f32) -> u32 {
        (BASE_WPM * speed.clamp(0.5, 2.0)).round() as u32
    }

    fn run(binary: &str, job: &SpeechJob, max_wait: Duration) -> Result<Vec<u8>, ProviderError> {
        use std::io::Read;
        use std::process::{Command, Stdio};
        use wait_timeout::ChildExt;

        let mut child = Command::new(binary)
            .arg("--stdout")
            .arg("-s")
            .arg(Self::words_per_minute(job.speed).to_string())
            .arg("-v")
            .arg(&job.language)
            .arg(&job.text)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain stdout while waiting, or a long story fills the pipe and stalls
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Transient("espeak: stdout not captured".into()))?;
        let reader = std::thread::spawn(move || {
            let mut audio = Vec::new();
            stdout.read_to_end(&mut audio).map(|_| audio)
        });

        match child.wait_timeout(max_wait)? {
            Some(status) => {
                let audio = reader.join().map_err(|_| {
                    ProviderError::Transient("espeak: reader thread panicked".into())
                })??;
                if status.success() && !audio.is_empty() {
                    Ok(audio)
                } else {
                    let mut err_msg = String::new();
                    if let Some(mut stderr) = child.stderr.take() {
                        let _ = stderr.read_to_string(&mut err_msg);
                    }
                    Err(ProviderError::Transient(format!("espeak error: {}", err_msg.trim())))
                }
            }
            None => {
                // Timeout occurred, kill the process
                let _ = child.kill();
                let _ = child.wait();
                Err(ProviderError::Timeout(max_wait))
            }
        }
    }
}

impl Provider for EspeakBackend {
    fn id(&self) -> &'static str {
        "espeak"
    }
}

#[async_trait]
impl AudioProvider for EspeakBackend {
    async fn synthesize(&self, job: &SpeechJob) -> Result<Vec<u8>, ProviderError> {
        let binary = self.binary.clone();
        let job = job.clone();
        let max_wait = self.max_wait;

        tokio::task::spawn_blocking(move || Self::run(&binary, &job, max_wait))
            .await
            .map_err(|e| ProviderError::Transient(format!("espeak task failed: {}", e)))?
    }
}
