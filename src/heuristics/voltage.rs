use super::{AttrValue, AttributeMap, key_tokens};
use regex::Regex;
use std::sync::LazyLock;

/// Key fragments that mark an attribute as a voltage field.
pub const VOLTAGE_KEY_TOKENS: &[&str] = &[
    "VOLT", "HV", "LV", "RATED", "SYSTEM", "PRI", "SEC", "HIGH", "แรงดัน",
];

/// Anything above this is an impulse/withstand figure, not a system voltage.
const SCAN_CEILING_KV: f64 = 1500.0;
/// Lower edge of the low-voltage band.
const SCAN_FLOOR_KV: f64 = 0.05;

/// Digits with optional space/comma thousands groups and a decimal part.
const NUMBER: &str = r"\d{1,3}(?:[ ,]\d{3})+(?:[.,]\d+)?|\d+(?:[.,]\d+)?";

static VOLTAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?P<num>{NUMBER})\s*(?P<unit>[kK]?[vV])(?:[^A-Za-z]|$)"
    ))
    .expect("voltage pattern")
});

// A number standing alone in a chunk. `tail` catches a following unit or
// word, which makes the number something other than a unit-less figure.
static UNITLESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?:^|[^\w.,%])(?P<num>{NUMBER})(?P<tail>\s*[\p{{L}}%°])?"
    ))
    .expect("unit-less number pattern")
});

// Apparent power and current units, standalone or glued to a number.
static NON_VOLTAGE_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Z])(?:[KM]?VA|KA|AMPS?|A)(?:[^A-Z]|$)").expect("unit pattern")
});

static WITHSTAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^A-Z])BIL(?:[^A-Z]|$)|IMPULSE|LIGHTNING|WITHSTAND")
        .expect("withstand pattern")
});

// "... kV / AC ..." pairs an impulse level with an AC withstand level.
static AC_WITHSTAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\s*AC\b").expect("ac withstand pattern"));

static UNIT_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\(\[]\s*(?P<unit>K?V)\s*[\)\]]|[_\s](?P<suffix>K?V)$").expect("hint pattern")
});

static HIGH_SIDE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:HV|PRI|PRIMARY|HIGH)\b.*\d").expect("high side line pattern")
});

/// One voltage figure read from text, in kV.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageCandidate {
    pub kv: f64,
    pub source: String,
}

/// Where the chosen high-side voltage came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageSource {
    HighSideField,
    VoltageFields,
    NotFound,
}

/// Outcome of high-side voltage inference over a whole attribute map.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageReading {
    pub kv: Option<f64>,
    pub source: VoltageSource,
    pub candidates: Vec<VoltageCandidate>,
}

/// Unit declared by an attribute name, e.g. `HV Voltage (kV)` or `LV_V`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitHint {
    Kilovolt,
    Volt,
}

fn unit_hint(key: &str) -> Option<UnitHint> {
    let upper = key.trim().to_uppercase();
    let caps = UNIT_HINT_RE.captures(&upper)?;
    let unit = caps.name("unit").or_else(|| caps.name("suffix"))?;
    Some(if unit.as_str() == "KV" {
        UnitHint::Kilovolt
    } else {
        UnitHint::Volt
    })
}

/// Split on rating separators. A comma between two digits belongs to the
/// number (`241,500` or `34,5`) and does not split.
fn split_chunks(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        let next = iter.peek().map(|&(_, n)| n);
        let is_sep = match c {
            '/' | ';' | '\n' | '\r' => true,
            ',' => !(prev.is_some_and(|p| p.is_ascii_digit())
                && next.is_some_and(|n| n.is_ascii_digit())),
            _ => false,
        };
        if is_sep {
            chunks.push(&text[start..i]);
            start = i + c.len_utf8();
        }
        prev = Some(c);
    }
    chunks.push(&text[start..]);
    chunks
}

fn parse_number(raw: &str) -> Option<f64> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let thousands = compact.contains(',') && compact.split(',').skip(1).all(|g| g.len() == 3);
    let normalised = if compact.contains('.') || thousands {
        compact.replace(',', "")
    } else {
        compact.replace(',', ".")
    };
    normalised.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn plausible(kv: f64) -> bool {
    (SCAN_FLOOR_KV..=SCAN_CEILING_KV).contains(&kv)
}

fn is_rejected_chunk(upper: &str) -> bool {
    NON_VOLTAGE_UNIT_RE.is_match(upper) || WITHSTAND_RE.is_match(upper)
}

/// Unit-less magnitude: above 1000 it is volts, 2..=1000 is already kV,
/// anything smaller is an index or a stray digit.
fn infer_unitless_kv(value: f64) -> Option<f64> {
    if value > 1000.0 {
        Some(value / 1000.0)
    } else if value >= 2.0 {
        Some(value)
    } else {
        None
    }
}

fn candidate(kv: f64, source: &str) -> Option<VoltageCandidate> {
    plausible(kv).then(|| VoltageCandidate {
        kv,
        source: source.trim().to_string(),
    })
}

/// Every plausible voltage figure in `text`, with `unitless` deciding what
/// a number without a unit means.
fn scan_with(text: &str, unitless: impl Fn(f64) -> Option<f64>) -> Vec<VoltageCandidate> {
    if AC_WITHSTAND_RE.is_match(&text.to_uppercase()) {
        return Vec::new();
    }

    let mut out = Vec::new();
    for chunk in split_chunks(text) {
        if is_rejected_chunk(&chunk.to_uppercase()) {
            continue;
        }
        for caps in VOLTAGE_RE.captures_iter(chunk) {
            let (Some(whole), Some(unit)) = (caps.get(0), caps.name("unit")) else {
                continue;
            };
            let Some(value) = parse_number(&caps["num"]) else {
                continue;
            };
            let kv = if unit.as_str().starts_with(['k', 'K']) {
                value
            } else {
                value / 1000.0
            };
            out.extend(candidate(kv, &chunk[whole.start()..unit.end()]));
        }
        for caps in UNITLESS_RE.captures_iter(chunk) {
            if caps.name("tail").is_some() {
                continue;
            }
            let kv = parse_number(&caps["num"]).and_then(&unitless);
            out.extend(kv.and_then(|kv| candidate(kv, &caps["num"])));
        }
    }
    out
}

/// Every plausible voltage figure in `text`. Numbers without a unit follow
/// the unit-less rule chunk by chunk, so `"115/22 kV"` yields 115 and 22.
pub fn scan_voltage_candidates(text: &str) -> Vec<VoltageCandidate> {
    scan_with(text, infer_unitless_kv)
}

fn max_kv<'a>(candidates: impl IntoIterator<Item = &'a VoltageCandidate>) -> Option<f64> {
    candidates
        .into_iter()
        .map(|c| c.kv)
        .fold(None, |best, kv| Some(best.map_or(kv, |b: f64| b.max(kv))))
}

/// Highest plausible voltage in `text`, in kV.
pub fn scan_voltage_kv(text: &str) -> Option<f64> {
    max_kv(&scan_voltage_candidates(text))
}

pub fn is_voltage_key(key: &str, key_tokens: &[&str]) -> bool {
    let upper = key.to_uppercase();
    key_tokens.iter().any(|t| upper.contains(t))
}

/// Keys naming a quantity that is not a system voltage: current, power,
/// impedance, withstand, frequency, temperature, tap position and the like.
fn names_other_quantity(key: &str) -> bool {
    let upper = key.to_uppercase();
    [
        "CURRENT", "AMP", "KVA", "POWER", "CAPACITY", "IMPEDANCE", "BIL", "IMPULSE",
        "WITHSTAND", "FREQ", "HZ", "TEMP", "RISE", "TAP", "POSITION", "YEAR", "WEIGHT",
        "MASS", "%",
    ]
    .iter()
    .any(|t| upper.contains(t))
}

fn is_high_side_key(key: &str) -> bool {
    if names_other_quantity(key) {
        return false;
    }
    key_tokens(key)
        .iter()
        .any(|t| matches!(t.as_str(), "HV" | "PRI" | "PRIMARY") || t.starts_with("HIGH"))
}

fn is_low_side_key(key: &str) -> bool {
    key_tokens(key)
        .iter()
        .any(|t| matches!(t.as_str(), "LV" | "SEC" | "SECONDARY") || t.starts_with("LOW"))
}

/// Candidates from one attribute entry. Unit-less numbers honour a unit
/// named in the key; without one, a low-side number is ambiguous and
/// skipped. Under a key naming another quantity they are never voltages.
fn scan_entry(key: &str, value: &str) -> Vec<VoltageCandidate> {
    let other = names_other_quantity(key);
    let hint = unit_hint(key);
    let low_side = is_low_side_key(key);
    scan_with(value, |v| match hint {
        _ if other => None,
        Some(UnitHint::Kilovolt) => Some(v),
        Some(UnitHint::Volt) => Some(v / 1000.0),
        None if low_side => None,
        None => infer_unitless_kv(v),
    })
}

fn scan_entries<'a>(
    map: &'a AttributeMap,
    mut keep: impl FnMut(&str) -> bool + 'a,
) -> Vec<VoltageCandidate> {
    map.present()
        .filter(|(k, _)| keep(k))
        .flat_map(|(k, v)| scan_entry(k, &v))
        .collect()
}

/// Highest plausible voltage across the entries whose key contains one of
/// `key_tokens` (see [`VOLTAGE_KEY_TOKENS`]).
pub fn scan_voltage_kv_over_map(map: &AttributeMap, key_tokens: &[&str]) -> Option<f64> {
    max_kv(&scan_entries(map, |k| is_voltage_key(k, key_tokens)))
}

/// High-side voltage of the nameplate. Explicit high-side fields win; the
/// broad voltage-field scan runs whenever they give no valid figure.
pub fn infer_high_side(map: &AttributeMap) -> VoltageReading {
    let high = scan_entries(map, is_high_side_key);
    if let Some(kv) = max_kv(&high) {
        return VoltageReading {
            kv: Some(kv),
            source: VoltageSource::HighSideField,
            candidates: high,
        };
    }

    let broad = scan_entries(map, |k| is_voltage_key(k, VOLTAGE_KEY_TOKENS));
    match max_kv(&broad) {
        Some(kv) => VoltageReading {
            kv: Some(kv),
            source: VoltageSource::VoltageFields,
            candidates: broad,
        },
        None => VoltageReading {
            kv: None,
            source: VoltageSource::NotFound,
            candidates: Vec::new(),
        },
    }
}

/// First line of a raw model response that names the high side and carries
/// a `kV`/`V` figure, normalised to e.g. `"22000 V"`.
pub fn high_side_line(raw_text: &str) -> Option<String> {
    for line in raw_text.to_uppercase().lines() {
        if !HIGH_SIDE_LINE_RE.is_match(line) || line.contains("KVA") {
            continue;
        }
        if let Some(caps) = VOLTAGE_RE.captures(line) {
            let unit = if caps["unit"].starts_with('K') { "kV" } else { "V" };
            return Some(format!("{} {}", caps["num"].trim(), unit));
        }
    }
    None
}

/// Fill voltage fields the model left as `-` with the high-side figure
/// found in its raw text. Low-side fields are left alone. Returns the
/// number of fields filled.
pub fn backfill_voltage(map: &mut AttributeMap, raw_text: &str) -> usize {
    let empty: Vec<String> = map
        .iter()
        .filter(|(k, v)| {
            v.is_missing()
                && is_voltage_key(k, VOLTAGE_KEY_TOKENS)
                && !is_low_side_key(k)
                && !names_other_quantity(k)
        })
        .map(|(k, _)| k.to_string())
        .collect();
    if empty.is_empty() {
        return 0;
    }
    let Some(figure) = high_side_line(raw_text) else {
        return 0;
    };
    for key in &empty {
        map.set(key.as_str(), AttrValue::Text(figure.clone()));
    }
    empty.len()
}
