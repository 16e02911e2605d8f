use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static SHORT_TOKEN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9a-e]\b").unwrap());

/// Restores packed script source. `dictionary` is the `|`-joined word list the
/// packer emitted; every isolated `0`-`9`/`a`-`e` in `packed` addresses
/// entries 0 to 14 of it. Tokens pointing past the end of the list are kept.
pub fn unpack(packed: &str, dictionary: &str) -> String {
    let words: Vec<&str> = dictionary.split('|').collect();

    SHORT_TOKEN_REGEX
        .replace_all(packed, |caps: &Captures| {
            let token = &caps[0];
            token
                .chars()
                .next()
                .and_then(|c| c.to_digit(16))
                .and_then(|index| words.get(index as usize))
                .map(|word| word.to_string())
                .unwrap_or_else(|| token.to_string())
        })
        .into_owned()
}
