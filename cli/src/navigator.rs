use std::sync::Mutex;
use unihive_checkout::Navigator;

/// Stands in for the browser location bar in the shell
pub(crate) struct CliNavigator {
    location: Mutex<String>,
}

impl CliNavigator {
    pub(crate) fn new(location: String) -> Self {
        Self {
            location: Mutex::new(location),
        }
    }

    /// Simulates the browser landing on `url`, e.g. the gateway's return URL
    pub(crate) fn visit(&self, url: &str) {
        if let Ok(mut location) = self.location.lock() {
            *location = url.to_string();
        }
    }
}

impl Navigator for CliNavigator {
    fn current_url(&self) -> String {
        self.location
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    fn replace_url(&self, url: &str) {
        self.visit(url);
    }

    fn navigate(&self, url: &str) {
        println!("\nOpen {url} to continue");
        self.visit(url);
    }
}
