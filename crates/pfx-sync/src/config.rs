use std::path::{Path, PathBuf};
use std::time::Duration;

use pfx_adapters::{Pacing, SiteProfile, WebDriverConfig};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub input_path: PathBuf,
    pub data_path: PathBuf,
    pub output_path: PathBuf,
    pub site: SiteProfile,
    pub webdriver: WebDriverConfig,
    pub geocoding_api_key: Option<String>,
    pub alert_command: Option<Vec<String>>,
    pub pacing: Pacing,
    pub http_timeout_secs: u64,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str, default: u64| {
            Duration::from_secs(var(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default))
        };

        let data_dir = var("PFX_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));
        let defaults = Pacing::default();

        Self {
            input_path: var("PFX_INPUT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("input.csv")),
            data_path: var("PFX_DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("data.json")),
            output_path: var("PFX_OUTPUT_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("output-compiled.csv")),
            data_dir,
            site: var("PFX_SITE_URL")
                .map(SiteProfile::new)
                .unwrap_or_default(),
            webdriver: WebDriverConfig {
                endpoint: var("WEBDRIVER_URL").unwrap_or_else(|| "http://localhost:4444".to_string()),
                browser: var("PFX_BROWSER").unwrap_or_else(|| "firefox".to_string()),
                headless: var("PFX_HEADLESS")
                    .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                    .unwrap_or(false),
                ..Default::default()
            },
            geocoding_api_key: var("GOOGLE_MAPS_API_KEY"),
            alert_command: var("PFX_ALERT_COMMAND")
                .map(|v| v.split_whitespace().map(str::to_string).collect()),
            pacing: Pacing {
                transient_backoff: secs("PFX_TRANSIENT_BACKOFF_SECS", defaults.transient_backoff.as_secs()),
                detail_settle: secs("PFX_DETAIL_SETTLE_SECS", defaults.detail_settle.as_secs()),
                results_settle: secs("PFX_RESULTS_SETTLE_SECS", defaults.results_settle.as_secs()),
                next_page_pause: secs("PFX_NEXT_PAGE_PAUSE_SECS", defaults.next_page_pause.as_secs()),
                challenge_poll: secs("PFX_CHALLENGE_POLL_SECS", defaults.challenge_poll.as_secs()),
                expand_settle: secs("PFX_EXPAND_SETTLE_SECS", defaults.expand_settle.as_secs()),
            },
            http_timeout_secs: var("PFX_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(20),
        }
    }

    /// Moves every file that still sits at its default location into `dir`.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let rebase = |path: &Path, name: &str| {
            if path == self.data_dir.join(name) {
                dir.join(name)
            } else {
                path.to_path_buf()
            }
        };
        let input_path = rebase(&self.input_path, "input.csv");
        let data_path = rebase(&self.data_path, "data.json");
        let output_path = rebase(&self.output_path, "output-compiled.csv");
        self.input_path = input_path;
        self.data_path = data_path;
        self.output_path = output_path;
        self.data_dir = dir;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> PipelineConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_live_under_data_dir() {
        let config = config_from(&[]);
        assert_eq!(config.input_path, PathBuf::from("./data/input.csv"));
        assert_eq!(config.data_path, PathBuf::from("./data/data.json"));
        assert_eq!(config.output_path, PathBuf::from("./data/output-compiled.csv"));
        assert_eq!(config.pacing, Pacing::default());
        assert_eq!(config.webdriver.browser, "firefox");
        assert!(config.geocoding_api_key.is_none());
        assert!(config.alert_command.is_none());
    }

    #[test]
    fn environment_overrides_are_applied() {
        let config = config_from(&[
            ("PFX_DATA_DIR", "/srv/pfx"),
            ("PFX_OUTPUT_FILE", "/tmp/out.csv"),
            ("PFX_HEADLESS", "true"),
            ("PFX_DETAIL_SETTLE_SECS", "2"),
            ("PFX_ALERT_COMMAND", "mpg123 -q alert.mp3"),
            ("GOOGLE_MAPS_API_KEY", "  "),
        ]);
        assert_eq!(config.input_path, PathBuf::from("/srv/pfx/input.csv"));
        assert_eq!(config.output_path, PathBuf::from("/tmp/out.csv"));
        assert!(config.webdriver.headless);
        assert_eq!(config.pacing.detail_settle, Duration::from_secs(2));
        assert_eq!(config.pacing.challenge_poll, Duration::from_secs(5));
        assert_eq!(
            config.alert_command,
            Some(vec!["mpg123".to_string(), "-q".to_string(), "alert.mp3".to_string()])
        );
        assert!(config.geocoding_api_key.is_none());
    }

    #[test]
    fn data_dir_override_keeps_explicit_paths() {
        let config = config_from(&[("PFX_OUTPUT_FILE", "/tmp/out.csv")]).with_data_dir("/work");
        assert_eq!(config.input_path, PathBuf::from("/work/input.csv"));
        assert_eq!(config.data_path, PathBuf::from("/work/data.json"));
        assert_eq!(config.output_path, PathBuf::from("/tmp/out.csv"));
    }
}
