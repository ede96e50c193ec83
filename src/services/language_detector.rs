//! Dominant-language detection over curated context.
//!
//! Three independent signals vote: Unicode script distribution, function-word
//! frequency and Latin character trigrams. A language needs a strict majority
//! of the votes cast; otherwise the configured default is used.

use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::Lazy;

use crate::{config::Config, models::domain::ContextBlock};

const SAMPLE_CHARS: usize = 4_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LanguageDetection {
    pub code: String,
    pub votes: BTreeMap<String, usize>,
    pub fell_back: bool,
}

pub trait LanguageSignal: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns an ISO-639-1 code, or `None` to abstain.
    fn detect(&self, sample: &str) -> Option<&'static str>;
}

pub struct LanguageDetector {
    signals: Vec<Box<dyn LanguageSignal>>,
    default_language: String,
    min_sample_chars: usize,
}

impl LanguageDetector {
    pub fn new(default_language: &str, min_sample_chars: usize) -> Self {
        Self::with_signals(
            vec![
                Box::new(ScriptSignal),
                Box::new(FunctionWordSignal),
                Box::new(TrigramSignal),
            ],
            default_language,
            min_sample_chars,
        )
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.default_language, config.language_min_sample_chars)
    }

    pub fn with_signals(
        signals: Vec<Box<dyn LanguageSignal>>,
        default_language: &str,
        min_sample_chars: usize,
    ) -> Self {
        Self {
            signals,
            default_language: normalize_language(default_language),
            min_sample_chars,
        }
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn detect_blocks(&self, blocks: &[ContextBlock]) -> LanguageDetection {
        let mut sample = String::new();
        for block in blocks {
            if sample.len() >= SAMPLE_CHARS * 4 {
                break;
            }
            sample.push_str(&block.text);
            sample.push('\n');
        }
        let sample: String = sample.chars().take(SAMPLE_CHARS).collect();
        self.detect(&sample)
    }

    pub fn detect(&self, text: &str) -> LanguageDetection {
        let letters = text.chars().filter(|c| c.is_alphabetic()).count();
        if letters < self.min_sample_chars {
            log::debug!(
                "Language sample too short ({} letters), using default '{}'",
                letters,
                self.default_language
            );
            return self.fallback(BTreeMap::new());
        }

        let mut votes: BTreeMap<String, usize> = BTreeMap::new();
        for signal in &self.signals {
            match signal.detect(text) {
                Some(code) => {
                    log::debug!("Language signal '{}' voted '{}'", signal.name(), code);
                    *votes.entry(code.to_string()).or_insert(0) += 1;
                }
                None => log::debug!("Language signal '{}' abstained", signal.name()),
            }
        }

        let cast: usize = votes.values().sum();
        let winner = votes
            .iter()
            .find(|(_, count)| **count * 2 > cast)
            .map(|(code, _)| code.clone());

        match winner {
            Some(code) => LanguageDetection {
                code,
                votes,
                fell_back: false,
            },
            None => {
                log::info!(
                    "Language signals disagree ({:?}), using default '{}'",
                    votes,
                    self.default_language
                );
                self.fallback(votes)
            }
        }
    }

    fn fallback(&self, votes: BTreeMap<String, usize>) -> LanguageDetection {
        LanguageDetection {
            code: self.default_language.clone(),
            votes,
            fell_back: true,
        }
    }
}

/// Lower-cased primary subtag: `"en-US"` -> `"en"`.
pub fn normalize_language(code: &str) -> String {
    code.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

pub fn languages_match(expected: &str, actual: &str) -> bool {
    let actual = normalize_language(actual);
    !actual.is_empty() && normalize_language(expected) == actual
}

pub fn language_name(code: &str) -> &'static str {
    match normalize_language(code).as_str() {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "nl" => "Dutch",
        "ru" => "Russian",
        "uk" => "Ukrainian",
        "zh" => "Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "el" => "Greek",
        "ar" => "Arabic",
        "he" => "Hebrew",
        "hi" => "Hindi",
        "th" => "Thai",
        _ => "the language identified by this ISO-639 code",
    }
}

/// Picks the top-scoring language if it clears `min_score` and beats the
/// runner-up by `ratio`.
fn pick_winner<S>(scores: &HashMap<&'static str, S>, min_score: S, ratio: f64) -> Option<&'static str>
where
    S: Copy + PartialOrd + Into<f64>,
{
    let mut ranked: Vec<(&'static str, S)> = scores.iter().map(|(k, v)| (*k, *v)).collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(b.0))
    });

    let (best, best_score) = *ranked.first()?;
    if best_score < min_score {
        return None;
    }
    if let Some((_, runner_up)) = ranked.get(1) {
        if best_score.into() < (*runner_up).into() * ratio {
            return None;
        }
    }
    Some(best)
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Script {
    Latin,
    Han,
    Kana,
    Hangul,
    Cyrillic,
    Greek,
    Arabic,
    Hebrew,
    Devanagari,
    Thai,
    Other,
}

fn script_of(c: char) -> Script {
    match c as u32 {
        0x0041..=0x005A | 0x0061..=0x007A | 0x00C0..=0x024F => Script::Latin,
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF => Script::Han,
        0x3040..=0x30FF | 0x31F0..=0x31FF => Script::Kana,
        0xAC00..=0xD7AF | 0x1100..=0x11FF | 0x3130..=0x318F => Script::Hangul,
        0x0400..=0x04FF => Script::Cyrillic,
        0x0370..=0x03FF => Script::Greek,
        0x0600..=0x06FF => Script::Arabic,
        0x0590..=0x05FF => Script::Hebrew,
        0x0900..=0x097F => Script::Devanagari,
        0x0E00..=0x0E7F => Script::Thai,
        _ => Script::Other,
    }
}

/// Votes from the dominant writing system. Abstains on Latin text, which it
/// cannot split by language.
pub struct ScriptSignal;

impl LanguageSignal for ScriptSignal {
    fn name(&self) -> &'static str {
        "script"
    }

    fn detect(&self, sample: &str) -> Option<&'static str> {
        let mut counts: HashMap<Script, usize> = HashMap::new();
        let mut letters = 0usize;
        for c in sample.chars().filter(|c| c.is_alphabetic()) {
            letters += 1;
            *counts.entry(script_of(c)).or_insert(0) += 1;
        }
        if letters == 0 {
            return None;
        }

        let share = |script: Script| counts.get(&script).copied().unwrap_or(0) as f64 / letters as f64;

        // Japanese mixes kanji with kana; any real amount of kana decides it.
        if share(Script::Kana) >= 0.1 && share(Script::Kana) + share(Script::Han) >= 0.5 {
            return Some("ja");
        }

        let (dominant, count) = counts.iter().max_by_key(|(_, count)| **count)?;
        if (*count as f64) / (letters as f64) < 0.5 {
            return None;
        }

        match dominant {
            Script::Han => Some("zh"),
            Script::Hangul => Some("ko"),
            Script::Cyrillic => {
                if sample.chars().any(|c| matches!(c, 'і' | 'ї' | 'є' | 'ґ')) {
                    Some("uk")
                } else {
                    Some("ru")
                }
            }
            Script::Greek => Some("el"),
            Script::Arabic => Some("ar"),
            Script::Hebrew => Some("he"),
            Script::Devanagari => Some("hi"),
            Script::Thai => Some("th"),
            Script::Kana => Some("ja"),
            Script::Latin | Script::Other => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Function words
// ---------------------------------------------------------------------------

static FUNCTION_WORDS: Lazy<Vec<(&'static str, HashSet<&'static str>)>> = Lazy::new(|| {
    let table: [(&'static str, &'static str); 8] = [
        ("en", "the and of to is in that it for with as are was this by on be from which an"),
        ("es", "el la los las de que y en es por un una para con del se su al como más"),
        ("fr", "le la les de des et est un une que qui dans pour pas au du sur avec ce sont"),
        ("de", "der die das und ist nicht ein eine zu den mit von sich auf für im dem des wird auch"),
        ("it", "il lo gli di che e è un una per non con del della sono nel alla anche come più"),
        ("pt", "o os as de que e é um uma para com não do da em no na por mais são"),
        ("nl", "de het een en van is dat op te in voor niet met zijn er aan ook als bij worden"),
        ("ru", "и в не на что с по это как из для к от но он она они мы при был"),
    ];
    table
        .into_iter()
        .map(|(code, words)| (code, words.split_whitespace().collect()))
        .collect()
});

// Scripts without word separators are matched by substring.
const UNSPACED_PARTICLES: [(&str, &[&str]); 3] = [
    ("zh", &["的", "是", "了", "在", "和", "有", "这", "也", "就", "不", "中", "为"]),
    ("ja", &["の", "は", "が", "を", "に", "で", "です", "ます", "した", "ない"]),
    ("ko", &["은", "는", "이", "가", "을", "를", "에", "의", "하다", "습니다"]),
];

pub struct FunctionWordSignal;

impl LanguageSignal for FunctionWordSignal {
    fn name(&self) -> &'static str {
        "function_words"
    }

    fn detect(&self, sample: &str) -> Option<&'static str> {
        let lowered = sample.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut scores: HashMap<&'static str, u32> = HashMap::new();
        for (code, words) in FUNCTION_WORDS.iter() {
            let hits = tokens.iter().filter(|t| words.contains(*t)).count() as u32;
            if hits > 0 {
                scores.insert(*code, hits);
            }
        }
        for (code, particles) in UNSPACED_PARTICLES {
            let hits: usize = particles.iter().map(|p| sample.matches(p).count()).sum();
            if hits > 0 {
                scores.insert(code, hits as u32);
            }
        }

        pick_winner(&scores, 3, 1.5)
    }
}

// ---------------------------------------------------------------------------
// Character trigrams
// ---------------------------------------------------------------------------

static TRIGRAM_PROFILES: Lazy<Vec<(&'static str, HashSet<&'static str>)>> = Lazy::new(|| {
    let table: [(&'static str, [&'static str; 15]); 7] = [
        ("en", [" th", "the", "he ", "ing", "ng ", " an", "and", "nd ", " of", "of ", "ed ", "hat", " wh", "tha", " is"]),
        ("es", [" de", "de ", " la", "la ", "os ", "as ", "que", "ue ", " qu", " el", "el ", "ión", "ent", " co", "ado"]),
        ("fr", [" de", "es ", "de ", " le", "le ", "ent", "les", " la", "que", "ion", "ait", " et", "et ", "ux ", "eur"]),
        ("de", ["en ", "er ", "der", "ie ", " di", "die", "ich", "ein", "sch", "und", " un", "nd ", "cht", "che", " de"]),
        ("it", [" di", "di ", "la ", "to ", "re ", " la", "che", "ell", "del", "one", " co", "ato", "ion", "lla", "zio"]),
        ("pt", [" de", "de ", "os ", "ão ", "ção", "que", " qu", "ue ", "do ", " do", "da ", "as ", "ent", " co", "em "]),
        ("nl", ["en ", "de ", " de", "een", "et ", "van", " va", "an ", "het", " he", "ij ", "oor", "ijk", " ee", "aar"]),
    ];
    table
        .into_iter()
        .map(|(code, grams)| (code, grams.into_iter().collect()))
        .collect()
});

/// Latin-script trigram profile match. Abstains on non-Latin text.
pub struct TrigramSignal;

impl LanguageSignal for TrigramSignal {
    fn name(&self) -> &'static str {
        "trigrams"
    }

    fn detect(&self, sample: &str) -> Option<&'static str> {
        let letters = sample.chars().filter(|c| c.is_alphabetic()).count();
        let latin = sample
            .chars()
            .filter(|c| c.is_alphabetic() && script_of(*c) == Script::Latin)
            .count();
        if letters == 0 || (latin as f64) / (letters as f64) < 0.5 {
            return None;
        }

        let cleaned: String = sample
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphabetic() { c } else { ' ' })
            .collect();
        let normalized = format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "));
        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() < 3 {
            return None;
        }

        let grams: Vec<String> = chars.windows(3).map(|w| w.iter().collect()).collect();
        let total = grams.len() as f64;

        let mut scores: HashMap<&'static str, f64> = HashMap::new();
        for (code, profile) in TRIGRAM_PROFILES.iter() {
            let hits = grams.iter().filter(|g| profile.contains(g.as_str())).count();
            if hits > 0 {
                scores.insert(*code, hits as f64 / total);
            }
        }

        pick_winner(&scores, 0.05, 1.15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGLISH: &str = "Photosynthesis is the process by which green plants use sunlight to synthesize food from carbon dioxide and water. The light reactions take place in the thylakoid membranes of the chloroplast.";
    const SPANISH: &str = "La fotosíntesis es el proceso por el cual las plantas verdes utilizan la luz del sol para sintetizar alimentos a partir del dióxido de carbono y el agua. Las reacciones luminosas ocurren en las membranas de los tilacoides.";
    const FRENCH: &str = "La photosynthèse est le processus par lequel les plantes vertes utilisent la lumière du soleil pour synthétiser des aliments à partir du dioxyde de carbone et de l'eau. Les réactions lumineuses se déroulent dans les membranes des thylakoïdes.";
    const GERMAN: &str = "Die Photosynthese ist der Prozess, bei dem grüne Pflanzen das Sonnenlicht nutzen, um aus Kohlendioxid und Wasser Nahrung herzustellen. Die Lichtreaktionen finden in den Thylakoidmembranen statt.";
    const CHINESE: &str = "光合作用是绿色植物利用阳光将二氧化碳和水合成有机物的过程。光反应发生在叶绿体的类囊体膜上，这是能量转换的关键步骤。";
    const JAPANESE: &str = "光合成は、緑色植物が太陽の光を使って二酸化炭素と水から栄養を合成する過程です。光反応は葉緑体のチラコイド膜で起こります。";
    const RUSSIAN: &str = "Фотосинтез это процесс, при котором зелёные растения используют солнечный свет для синтеза питательных веществ из углекислого газа и воды.";

    fn detector() -> LanguageDetector {
        LanguageDetector::new("en", 20)
    }

    struct FixedSignal(Option<&'static str>);

    impl LanguageSignal for FixedSignal {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&self, _sample: &str) -> Option<&'static str> {
            self.0
        }
    }

    #[test]
    fn test_detects_latin_languages_by_majority() {
        for (text, expected) in [(ENGLISH, "en"), (SPANISH, "es"), (FRENCH, "fr"), (GERMAN, "de")] {
            let detection = detector().detect(text);
            assert_eq!(detection.code, expected, "votes: {:?}", detection.votes);
            assert!(!detection.fell_back);
        }
    }

    #[test]
    fn test_detects_non_latin_scripts() {
        for (text, expected) in [(CHINESE, "zh"), (JAPANESE, "ja"), (RUSSIAN, "ru")] {
            let detection = detector().detect(text);
            assert_eq!(detection.code, expected, "votes: {:?}", detection.votes);
        }
    }

    #[test]
    fn test_short_sample_falls_back_to_default() {
        let detection = LanguageDetector::new("de", 40).detect("Hola mundo");
        assert_eq!(detection.code, "de");
        assert!(detection.fell_back);
        assert!(detection.votes.is_empty());
    }

    #[test]
    fn test_tie_between_signals_falls_back_to_default() {
        let detector = LanguageDetector::with_signals(
            vec![
                Box::new(FixedSignal(Some("en"))),
                Box::new(FixedSignal(Some("fr"))),
                Box::new(FixedSignal(None)),
            ],
            "es",
            1,
        );

        let detection = detector.detect(ENGLISH);
        assert_eq!(detection.code, "es");
        assert!(detection.fell_back);
        assert_eq!(detection.votes.len(), 2);
    }

    #[test]
    fn test_all_abstaining_signals_fall_back() {
        let detector = LanguageDetector::with_signals(
            vec![Box::new(FixedSignal(None)), Box::new(FixedSignal(None))],
            "EN-us",
            1,
        );
        let detection = detector.detect(ENGLISH);
        assert_eq!(detection.code, "en");
        assert!(detection.fell_back);
    }

    #[test]
    fn test_detect_blocks_concatenates_block_text() {
        let blocks = vec![
            ContextBlock::new(1, "doc-1", SPANISH.to_string()),
            ContextBlock::new(2, "doc-1", SPANISH.to_string()),
        ];
        assert_eq!(detector().detect_blocks(&blocks).code, "es");
    }

    #[test]
    fn test_language_codes_compare_on_primary_subtag() {
        assert!(languages_match("en", "en-US"));
        assert!(languages_match("pt_BR", "PT"));
        assert!(!languages_match("en", "fr"));
        assert!(!languages_match("en", ""));
        assert_eq!(language_name("es"), "Spanish");
    }
}
