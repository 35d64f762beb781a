use anyhow::Result;
use log::warn;

use super::local_store::KeyValueStore;
use crate::models::{Audience, Tone};

const TONE_KEY: &str = "default_tone";
const AUDIENCE_KEY: &str = "default_audience";
const USER_NAME_KEY: &str = "user_name";

/// Form defaults the user picked in settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preferences {
    pub default_tone: Tone,
    pub default_audience: Audience,
    pub user_name: Option<String>,
}

impl Preferences {
    pub fn load(kv: &dyn KeyValueStore) -> Result<Self> {
        let mut prefs = Preferences::default();

        if let Some(raw) = kv.get(TONE_KEY)? {
            match raw.parse() {
                Ok(tone) => prefs.default_tone = tone,
                Err(e) => warn!("Ignoring stored {}: {}", TONE_KEY, e),
            }
        }
        if let Some(raw) = kv.get(AUDIENCE_KEY)? {
            match raw.parse() {
                Ok(audience) => prefs.default_audience = audience,
                Err(e) => warn!("Ignoring stored {}: {}", AUDIENCE_KEY, e),
            }
        }
        prefs.user_name = kv.get(USER_NAME_KEY)?.filter(|name| !name.trim().is_empty());

        Ok(prefs)
    }

    pub fn save(&self, kv: &dyn KeyValueStore) -> Result<()> {
        kv.set(TONE_KEY, self.default_tone.as_str())?;
        kv.set(AUDIENCE_KEY, self.default_audience.as_str())?;
        match &self.user_name {
            Some(name) => kv.set(USER_NAME_KEY, name),
            None => kv.remove(USER_NAME_KEY),
        }
    }
}
