use std::fmt;
use std::str::FromStr;

pub const CODE_PREFIX: &str = "POWTR-";

/// Sentinel for transformers above the extra-high band. It does not encode
/// a real type or tap value.
pub const OVER_RANGE_CODE: &str = "POWTR-3-OO";

/// Top of the extra-high band; anything above triggers the override.
pub const EXTRA_HIGH_CEILING_KV: f64 = 765.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Single,
    Three,
}

impl Phase {
    pub fn as_char(self) -> char {
        match self {
            Phase::Single => '1',
            Phase::Three => '3',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '1' => Some(Phase::Single),
            '3' => Some(Phase::Three),
            _ => None,
        }
    }
}

/// Voltage band, ordered `Unknown < Low < Medium < High < ExtraHigh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VoltageBand {
    Unknown,
    Low,
    Medium,
    High,
    ExtraHigh,
}

impl VoltageBand {
    /// Band of a high-side voltage. Values outside `[0.05, 765]` have no
    /// band; the over-range case is handled by [`assemble_code`].
    pub fn from_kv(kv: Option<f64>) -> Self {
        match kv {
            Some(kv) if (345.0..=EXTRA_HIGH_CEILING_KV).contains(&kv) => VoltageBand::ExtraHigh,
            Some(kv) if (100.0..345.0).contains(&kv) => VoltageBand::High,
            Some(kv) if (1.0..100.0).contains(&kv) => VoltageBand::Medium,
            Some(kv) if (0.05..1.0).contains(&kv) => VoltageBand::Low,
            _ => VoltageBand::Unknown,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            VoltageBand::ExtraHigh => 'E',
            VoltageBand::High => 'H',
            VoltageBand::Medium => 'M',
            VoltageBand::Low => 'L',
            VoltageBand::Unknown => '-',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'E' => Some(VoltageBand::ExtraHigh),
            'H' => Some(VoltageBand::High),
            'M' => Some(VoltageBand::Medium),
            'L' => Some(VoltageBand::Low),
            '-' => Some(VoltageBand::Unknown),
            _ => None,
        }
    }
}

/// Insulation / cooling medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Insulation {
    Oil,
    Dry,
    Unknown,
}

impl Insulation {
    pub fn as_char(self) -> char {
        match self {
            Insulation::Oil => 'O',
            Insulation::Dry => 'D',
            Insulation::Unknown => '-',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'O' => Some(Insulation::Oil),
            'D' => Some(Insulation::Dry),
            '-' => Some(Insulation::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapChanger {
    OnLoad,
    OffLoad,
    NoTap,
}

impl TapChanger {
    pub fn as_char(self) -> char {
        match self {
            TapChanger::OnLoad => 'O',
            TapChanger::OffLoad => 'F',
            TapChanger::NoTap => 'N',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'O' => Some(TapChanger::OnLoad),
            'F' => Some(TapChanger::OffLoad),
            'N' => Some(TapChanger::NoTap),
            _ => None,
        }
    }
}

/// `POWTR-{phase}{voltage}{type}{tap}`, or the over-range sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassificationCode {
    Standard {
        phase: Phase,
        band: VoltageBand,
        insulation: Insulation,
        tap: TapChanger,
    },
    OverRange,
}

impl fmt::Display for ClassificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationCode::Standard {
                phase,
                band,
                insulation,
                tap,
            } => write!(
                f,
                "{CODE_PREFIX}{}{}{}{}",
                phase.as_char(),
                band.as_char(),
                insulation.as_char(),
                tap.as_char()
            ),
            ClassificationCode::OverRange => f.write_str(OVER_RANGE_CODE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeParseError(pub String);

impl fmt::Display for CodeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a POWTR code: {:?}", self.0)
    }
}

impl std::error::Error for CodeParseError {}

impl FromStr for ClassificationCode {
    type Err = CodeParseError;

    /// Parses the code grammar. `POWTR-3-OO` reads back as the standard
    /// form it is textually identical to (three-phase, unknown band, oil,
    /// on-load); both render to the same string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CodeParseError(s.to_string());
        let body = s.strip_prefix(CODE_PREFIX).ok_or_else(err)?;
        let chars: Vec<char> = body.chars().collect();
        let [p, v, t, tap] = chars.as_slice() else {
            return Err(err());
        };
        Ok(ClassificationCode::Standard {
            phase: Phase::from_char(*p).ok_or_else(err)?,
            band: VoltageBand::from_char(*v).ok_or_else(err)?,
            insulation: Insulation::from_char(*t).ok_or_else(err)?,
            tap: TapChanger::from_char(*tap).ok_or_else(err)?,
        })
    }
}

/// Combine the four classifier outputs. A high-side voltage above the
/// extra-high band yields the fixed over-range code whatever the rest says.
pub fn assemble_code(
    phase: Phase,
    band: VoltageBand,
    insulation: Insulation,
    tap: TapChanger,
    kv: Option<f64>,
) -> ClassificationCode {
    if kv.is_some_and(|kv| kv > EXTRA_HIGH_CEILING_KV) {
        return ClassificationCode::OverRange;
    }
    ClassificationCode::Standard {
        phase,
        band,
        insulation,
        tap,
    }
}
