use serde::{Deserialize, Serialize};

/// Numbering scheme used by one nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SymbolSequence {
    LowerLetter,
    LowerRoman,
    Digit,
    UpperLetter,
    UpperRoman,
}

impl SymbolSequence {
    pub(super) fn as_str(self) -> &'static str {
        match self {
            Self::LowerLetter => "lower_letter",
            Self::LowerRoman => "lower_roman",
            Self::Digit => "digit",
            Self::UpperLetter => "upper_letter",
            Self::UpperRoman => "upper_roman",
        }
    }

    pub(super) fn first_symbol(self) -> &'static str {
        match self {
            Self::LowerLetter => "a",
            Self::LowerRoman => "i",
            Self::Digit => "1",
            Self::UpperLetter => "A",
            Self::UpperRoman => "I",
        }
    }

    /// Position of `symbol` within the sequence, starting at 1.
    pub(super) fn ordinal(self, symbol: &str) -> Option<u32> {
        match self {
            Self::LowerLetter => letter_ordinal(symbol, |character| character.is_ascii_lowercase()),
            Self::UpperLetter => letter_ordinal(symbol, |character| character.is_ascii_uppercase()),
            Self::Digit => {
                if symbol.is_empty() || !symbol.chars().all(|character| character.is_ascii_digit())
                {
                    return None;
                }
                symbol.parse::<u32>().ok()
            }
            Self::LowerRoman => {
                if !symbol.chars().all(|character| character.is_ascii_lowercase()) {
                    return None;
                }
                roman_value(symbol)
            }
            Self::UpperRoman => {
                if !symbol.chars().all(|character| character.is_ascii_uppercase()) {
                    return None;
                }
                roman_value(symbol)
            }
        }
    }

    pub(super) fn is_successor(self, previous: &str, next: &str) -> bool {
        match (self.ordinal(previous), self.ordinal(next)) {
            (Some(previous), Some(next)) => next == previous + 1,
            _ => false,
        }
    }
}

fn letter_ordinal(symbol: &str, accepts: impl Fn(char) -> bool) -> Option<u32> {
    let mut characters = symbol.chars();
    let character = characters.next()?;
    if characters.next().is_some() || !accepts(character) {
        return None;
    }

    Some(u32::from(character.to_ascii_lowercase()) - u32::from('a') + 1)
}

/// Decides whether `candidate` opens a new node at its level.
///
/// With no previous sibling only the first symbol of the sequence is accepted;
/// otherwise the candidate must be the immediate successor. Everything else,
/// including repeats and wrap-arounds, stays body text.
pub(super) fn accepts_marker(
    previous_sibling: Option<&str>,
    candidate: &str,
    sequence: SymbolSequence,
) -> bool {
    match previous_sibling {
        None => candidate == sequence.first_symbol(),
        Some(previous) => sequence.is_successor(previous, candidate),
    }
}

/// Value of a canonical roman numeral (either case). Non-canonical forms such
/// as `iiii` or `ic` are rejected.
pub(super) fn roman_value(symbol: &str) -> Option<u32> {
    if symbol.is_empty() || symbol.len() > 15 {
        return None;
    }

    let upper = symbol.to_ascii_uppercase();
    let mut total = 0u32;
    let mut previous = 0u32;
    for character in upper.chars().rev() {
        let value = match character {
            'I' => 1,
            'V' => 5,
            'X' => 10,
            'L' => 50,
            'C' => 100,
            'D' => 500,
            'M' => 1000,
            _ => return None,
        };
        if value < previous {
            total = total.checked_sub(value)?;
        } else {
            total += value;
            previous = value;
        }
    }

    if total == 0 || total > 3999 || to_roman(total) != upper {
        return None;
    }

    Some(total)
}

fn to_roman(mut value: u32) -> String {
    const NUMERALS: [(u32, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];

    let mut out = String::new();
    for (amount, numeral) in NUMERALS {
        while value >= amount {
            out.push_str(numeral);
            value -= amount;
        }
    }
    out
}
