use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// The parts of the upload page the sequencer touches: the submit control,
/// user-visible alerts and navigation after success.
pub trait UploadUi: Send + Sync {
    fn set_submit_enabled(&self, enabled: bool);

    fn is_submit_enabled(&self) -> bool;

    fn alert(&self, message: &str);

    fn navigate(&self, location: &str);
}

/// Terminal stand-in for the upload page.
pub struct ConsoleUi {
    submit_enabled: AtomicBool,
    base_url: Option<reqwest::Url>,
    location: Mutex<Option<String>>,
    alerts: Mutex<Vec<String>>,
}

impl ConsoleUi {
    pub fn new(base_url: &str) -> Self {
        Self {
            submit_enabled: AtomicBool::new(true),
            base_url: reqwest::Url::parse(base_url).ok(),
            location: Mutex::new(None),
            alerts: Mutex::new(Vec::new()),
        }
    }

    /// Absolute URL of the last navigation, if any.
    pub fn location(&self) -> Option<String> {
        self.location.lock().ok().and_then(|l| l.clone())
    }

    /// Alerts shown so far, oldest first.
    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl UploadUi for ConsoleUi {
    fn set_submit_enabled(&self, enabled: bool) {
        self.submit_enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_submit_enabled(&self) -> bool {
        self.submit_enabled.load(Ordering::SeqCst)
    }

    /// The one line a failure prints on stderr.
    fn alert(&self, message: &str) {
        eprintln!("❌ {}", message);
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(message.to_string());
        }
    }

    fn navigate(&self, location: &str) {
        let absolute = self
            .base_url
            .as_ref()
            .and_then(|base| base.join(location).ok())
            .map(|url| url.to_string())
            .unwrap_or_else(|| location.to_string());

        tracing::info!("🔗 Navigating to {}", absolute);
        println!("{}", absolute);

        if let Ok(mut current) = self.location.lock() {
            *current = Some(absolute);
        }
    }
}
