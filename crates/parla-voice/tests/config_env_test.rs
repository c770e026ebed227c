//! Environment overrides for `VoiceConfig`. Kept in its own test binary so the
//! variables it sets cannot leak into other config tests.

use parla_voice::VoiceConfig;
use std::io::Write;

const THRESHOLD_VAR: &str = "PARLA_SILENCE_THRESHOLD";
const STT_KEY_VAR: &str = "PARLA_STT__API_KEY";
const TTS_VOICE_VAR: &str = "PARLA_TTS__VOICE";

#[test]
fn environment_overrides_file_values() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(
        br#"
silence_threshold = 12

[stt]
api_key = "key-from-file"

[tts]
voice = "alloy"
"#,
    )
    .unwrap();

    std::env::set_var(THRESHOLD_VAR, "7");
    std::env::set_var(STT_KEY_VAR, "key-from-env");
    std::env::set_var(TTS_VOICE_VAR, "shimmer");

    let loaded = VoiceConfig::load_from(Some(file.path()));

    std::env::remove_var(THRESHOLD_VAR);
    std::env::remove_var(STT_KEY_VAR);
    std::env::remove_var(TTS_VOICE_VAR);

    let config = loaded.unwrap();
    assert_eq!(config.silence_threshold, Some(7));
    assert_eq!(config.silence_threshold(), 7);
    assert_eq!(config.stt.api_key.as_deref(), Some("key-from-env"));
    assert_eq!(config.tts.voice, "shimmer");
    // Untouched keys still come from the file and defaults.
    assert_eq!(config.stt.model, "whisper-1");

    let from_file = VoiceConfig::load_from(Some(file.path())).unwrap();
    assert_eq!(from_file.silence_threshold, Some(12));
    assert_eq!(from_file.stt.api_key.as_deref(), Some("key-from-file"));
    assert_eq!(from_file.tts.voice, "alloy");
}
