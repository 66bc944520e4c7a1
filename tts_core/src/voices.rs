use std::{collections::HashMap, fs, path::Path};

use anyhow::Context;
use serde::Serialize;
use tracing::warn;

/// Piper's native rate when a model config does not say otherwise.
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceEntry {
    /// Path to the `.onnx` model handed to the piper binary.
    pub model: String,
    pub sample_rate: u32,
    pub speaker: Option<i64>,
}

/// Language key -> Piper voice.
#[derive(Debug, Clone, Default)]
pub struct VoiceMap {
    entries: HashMap<String, VoiceEntry>,
}

impl VoiceMap {
    pub fn from_entries(entries: impl IntoIterator<Item = (String, VoiceEntry)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Load a map file. Two entry forms are accepted:
    ///
    /// ```json
    /// { "en": "models/en_US-amy-medium.onnx",
    ///   "hi": { "model": "models/hi.onnx", "sample_rate": 22050, "speaker": 0 } }
    /// ```
    ///
    /// Relative model paths are resolved against the map file's directory.
    pub fn load<P: AsRef<Path>>(p: P) -> anyhow::Result<Self> {
        let path = p.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let json: serde_json::Value =
            serde_json::from_str(&text).with_context(|| "map.json is not valid JSON")?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let obj = json
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("voice map must be a JSON object"))?;

        let mut entries = HashMap::new();
        for (lang, v) in obj {
            let (model, sample_rate, speaker) = match v {
                serde_json::Value::String(model) => (model.clone(), None, None),
                serde_json::Value::Object(o) => {
                    let model = o
                        .get("model")
                        .or_else(|| o.get("config"))
                        .and_then(|x| x.as_str())
                        .ok_or_else(|| anyhow::anyhow!("missing 'model' for language {}", lang))?
                        .to_string();
                    let sample_rate = o
                        .get("sample_rate")
                        .and_then(|x| x.as_u64())
                        .map(|sr| sr as u32);
                    let speaker = o.get("speaker").and_then(|x| x.as_i64());
                    (model, sample_rate, speaker)
                }
                _ => anyhow::bail!("invalid entry for language {}", lang),
            };

            let model = resolve(base, &model);
            let sample_rate = sample_rate.unwrap_or_else(|| Self::read_sample_rate(&model));
            entries.insert(
                lang.clone(),
                VoiceEntry {
                    model,
                    sample_rate,
                    speaker,
                },
            );
        }

        Ok(Self { entries })
    }

    /// Like [`VoiceMap::load`], but a missing or broken file yields an empty map.
    pub fn load_or_empty<P: AsRef<Path>>(p: P) -> Self {
        match Self::load(&p) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, path = %p.as_ref().display(), "voice map unavailable, piper disabled");
                Self::default()
            }
        }
    }

    /// Piper writes `<model>.onnx.json` next to the model; its
    /// `audio.sample_rate` is authoritative.
    fn read_sample_rate(model: &str) -> u32 {
        let cfg_path = format!("{model}.json");
        let rate = fs::read_to_string(&cfg_path)
            .ok()
            .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
            .and_then(|json| {
                json.get("audio")
                    .and_then(|a| a.get("sample_rate"))
                    .and_then(|sr| sr.as_u64())
            });
        match rate {
            Some(sr) => sr as u32,
            None => {
                warn!(config = %cfg_path, "no audio.sample_rate in model config, assuming {}", DEFAULT_SAMPLE_RATE);
                DEFAULT_SAMPLE_RATE
            }
        }
    }

    pub fn get(&self, language: &str) -> Option<&VoiceEntry> {
        self.entries.get(language).or_else(|| {
            // "en_US" falls back to "en" and vice versa
            let short = language.split(['_', '-']).next()?;
            self.entries.get(short).or_else(|| {
                self.entries
                    .iter()
                    .find(|(k, _)| k.split(['_', '-']).next() == Some(short))
                    .map(|(_, v)| v)
            })
        })
    }

    pub fn list_languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.entries.keys().cloned().collect();
        langs.sort();
        langs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve(base: &Path, model: &str) -> String {
    let path = Path::new(model);
    if path.is_absolute() || base.as_os_str().is_empty() {
        model.to_string()
    } else {
        base.join(path).to_string_lossy().into_owned()
    }
}

/// Script-based guess used when a request names no language.
pub fn detect_language(text: &str) -> &'static str {
    if text.chars().any(|c| ('\u{0C00}'..='\u{0C7F}').contains(&c)) {
        "te"
    } else if text.chars().any(|c| ('\u{0900}'..='\u{097F}').contains(&c)) {
        "hi"
    } else {
        "en"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("Hello there"), "en");
        assert_eq!(detect_language("नमस्ते दोस्त"), "hi");
        assert_eq!(detect_language("నమస్కారం"), "te");
        assert_eq!(detect_language(""), "en");
    }

    #[test]
    fn test_load_both_entry_forms() {
        let dir = tempfile::tempdir().unwrap();
        let model_cfg = dir.path().join("en.onnx.json");
        fs::write(&model_cfg, r#"{"audio": {"sample_rate": 16000}}"#).unwrap();

        let map_path = dir.path().join("map.json");
        let mut f = fs::File::create(&map_path).unwrap();
        write!(
            f,
            r#"{{"en": "en.onnx", "hi": {{"model": "/abs/hi.onnx", "sample_rate": 24000, "speaker": 3}}}}"#
        )
        .unwrap();

        let map = VoiceMap::load(&map_path).unwrap();
        assert_eq!(map.list_languages(), vec!["en", "hi"]);

        let en = map.get("en").unwrap();
        assert_eq!(en.sample_rate, 16000);
        assert!(en.model.ends_with("en.onnx"));
        assert_eq!(en.speaker, None);

        let hi = map.get("hi").unwrap();
        assert_eq!(hi.model, "/abs/hi.onnx");
        assert_eq!(hi.sample_rate, 24000);
        assert_eq!(hi.speaker, Some(3));
    }

    #[test]
    fn test_missing_model_config_uses_default_rate() {
        let dir = tempfile::tempdir().unwrap();
        let map_path = dir.path().join("map.json");
        fs::write(&map_path, r#"{"te": "te.onnx"}"#).unwrap();

        let map = VoiceMap::load(&map_path).unwrap();
        assert_eq!(map.get("te").unwrap().sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_region_fallback() {
        let entry = VoiceEntry {
            model: "m.onnx".into(),
            sample_rate: 22050,
            speaker: None,
        };
        let map = VoiceMap::from_entries([("en_US".to_string(), entry.clone())]);
        assert_eq!(map.get("en"), Some(&entry));
        assert_eq!(map.get("en_GB"), Some(&entry));
        assert_eq!(map.get("de"), None);
    }

    #[test]
    fn test_missing_file_yields_empty_map() {
        let map = VoiceMap::load_or_empty("/definitely/not/here/map.json");
        assert!(map.is_empty());
        assert!(VoiceMap::load("/definitely/not/here/map.json").is_err());
    }
}
