use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use unihive_checkout::Config;

const HISTORY_FILENAME: &str = "history.txt";
const CONFIG_FILENAME: &str = "config.json";
const LOCATION_FILENAME: &str = "location.txt";

pub(crate) struct CliPersistence {
    pub(crate) data_dir: PathBuf,
}

impl CliPersistence {
    pub(crate) fn history_file(&self) -> String {
        let history_file = self.data_dir.join(HISTORY_FILENAME);
        history_file.to_string_lossy().to_string()
    }

    /// Reads `config.json` from the data directory, if there is one
    pub(crate) fn load_config(&self) -> Result<Option<Config>> {
        let path = self.data_dir.join(CONFIG_FILENAME);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// The page the shell was on when it last exited
    pub(crate) fn load_location(&self) -> Option<String> {
        fs::read_to_string(self.data_dir.join(LOCATION_FILENAME))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub(crate) fn save_location(&self, url: &str) -> Result<()> {
        fs::write(self.data_dir.join(LOCATION_FILENAME), url)?;
        Ok(())
    }
}
