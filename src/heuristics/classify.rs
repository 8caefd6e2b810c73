use super::code::{Insulation, Phase, TapChanger};
use super::{AttributeMap, key_tokens};
use regex::Regex;
use std::sync::LazyLock;

static SINGLE_PHASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])1\s*-?\s*PH|SINGLE").expect("single phase pattern")
});

static THREE_PHASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])3\s*-?\s*PH|THREE").expect("three phase pattern")
});

static DRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:DRY|CAST|RESIN)\b").expect("dry pattern"));

static OIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:OIL|MINERAL|ONAN|ONAF|OFAF|OFWF|ODAF|ODWF|OFAN|KNAN|KNAF|ONO|OFA)\b")
        .expect("oil pattern")
});

// Bare cooling class letters; only trusted inside a cooling/type field.
static SHORT_COOLING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:OA|OF|ON)\b").expect("cooling class pattern"));

static ON_LOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:OLTC|ON[\s\-\u{2011}]?LOAD)\b").expect("on-load pattern")
});

static OFF_LOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:FLTC|OCTC|DETC|OFF[\s\-\u{2011}]*(?:LOAD|CIRCUIT))\b")
        .expect("off-load pattern")
});

static NO_TAP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:NTC|NO[\s\-\u{2011}]?TAP)\b").expect("no-tap pattern")
});

/// What the type and tap classifiers fall back to when nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierDefaults {
    pub insulation: Insulation,
    pub tap: TapChanger,
}

impl Default for ClassifierDefaults {
    fn default() -> Self {
        Self {
            insulation: Insulation::Oil,
            tap: TapChanger::OffLoad,
        }
    }
}

fn values_where<'a>(
    map: &'a AttributeMap,
    keep: impl Fn(&str) -> bool + 'a,
) -> impl Iterator<Item = String> + 'a {
    map.present()
        .filter(move |(k, _)| keep(k))
        .map(|(_, v)| v.to_uppercase())
}

fn is_phase_key(key: &str) -> bool {
    key_tokens(key)
        .iter()
        .any(|t| t == "PHASE" || t == "PHASES")
}

/// Single phase only on explicit evidence; three phase otherwise.
pub fn classify_phase(map: &AttributeMap) -> Phase {
    for value in values_where(map, is_phase_key) {
        let value = value.trim();
        if value == "1" || SINGLE_PHASE_RE.is_match(value) {
            return Phase::Single;
        }
        if value == "3" || THREE_PHASE_RE.is_match(value) {
            return Phase::Three;
        }
    }

    if values_where(map, |_| true).any(|v| SINGLE_PHASE_RE.is_match(&v)) {
        Phase::Single
    } else {
        Phase::Three
    }
}

fn is_insulation_key(key: &str) -> bool {
    let tokens = key_tokens(key);
    let has = |needle: &str| tokens.iter().any(|t| t.contains(needle));
    has("COOLING")
        || has("INSULATION")
        || has("INSULATING")
        || (tokens.iter().any(|t| t == "TYPE") && !has("TAP") && !has("CHANGER"))
}

fn insulation_from_text(text: &str, dedicated: bool) -> Option<Insulation> {
    if DRY_RE.is_match(text) {
        Some(Insulation::Dry)
    } else if OIL_RE.is_match(text) || (dedicated && SHORT_COOLING_RE.is_match(text)) {
        Some(Insulation::Oil)
    } else {
        None
    }
}

/// Dry-type wins over oil when both appear. A present cooling/type field
/// is the only source read; every value is scanned only when there is none.
pub fn classify_insulation(map: &AttributeMap, default: Insulation) -> Insulation {
    let dedicated: Vec<String> = values_where(map, is_insulation_key).collect();
    let found = if dedicated.is_empty() {
        let everything: Vec<String> = values_where(map, |_| true).collect();
        insulation_from_text(&everything.join(" "), false)
    } else {
        insulation_from_text(&dedicated.join(" "), true)
    };
    found.unwrap_or(default)
}

fn tap_from_text(text: &str) -> Option<TapChanger> {
    if ON_LOAD_RE.is_match(text) {
        Some(TapChanger::OnLoad)
    } else if OFF_LOAD_RE.is_match(text) {
        Some(TapChanger::OffLoad)
    } else if NO_TAP_RE.is_match(text) {
        Some(TapChanger::NoTap)
    } else {
        None
    }
}

fn key_has_all(key: &str, needles: &[&str]) -> bool {
    let upper = key.to_uppercase();
    needles.iter().all(|n| upper.contains(n))
}

/// Sources in decreasing confidence: a usage-tap-changer field, a
/// transformer-type field, then the `key value` text of every present entry.
pub fn classify_tap_changer(map: &AttributeMap, default: TapChanger) -> TapChanger {
    let from_values = |needles: &[&str]| {
        values_where(map, |k| key_has_all(k, needles)).find_map(|v| tap_from_text(&v))
    };

    from_values(&["USAGE", "TAP"])
        .or_else(|| from_values(&["TYPE", "TRANSFORMER"]))
        .or_else(|| {
            let all_text: Vec<String> = map
                .present()
                .map(|(k, v)| format!("{k} {v}").to_uppercase())
                .collect();
            tap_from_text(&all_text.join(" "))
        })
        .unwrap_or(default)
}
