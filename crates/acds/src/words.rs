//! Wordlist for human-memorable session strings.

use rand::Rng;

/// Short, distinct, easy to say over voice chat.
const WORDS: &[&str] = &[
    "amber", "basil", "birch", "bloom", "brave", "briar", "brook", "cedar",
    "chalk", "cloud", "coral", "cove", "crane", "crisp", "dawn", "delta",
    "drift", "dune", "ember", "fern", "flint", "frost", "gale", "glade",
    "grove", "hazel", "heron", "iris", "ivory", "juniper", "kelp", "lark",
    "lotus", "lunar", "maple", "marsh", "mellow", "mesa", "mist", "moss",
    "north", "oak", "onyx", "opal", "otter", "pearl", "pine", "plume",
    "quartz", "raven", "reef", "ridge", "river", "robin", "sage", "slate",
    "spruce", "stone", "swift", "thorn", "tide", "vale", "willow", "wren",
];

/// Generate a three-word hyphenated session string.
pub(crate) fn session_string<R: Rng>(rng: &mut R) -> String {
    let mut parts = Vec::with_capacity(3);
    for _ in 0..3 {
        parts.push(WORDS[rng.gen_range(0..WORDS.len())]);
    }
    parts.join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape() {
        let mut rng = rand::thread_rng();
        let s = session_string(&mut rng);
        assert_eq!(s.split('-').count(), 3);
        assert!(s.len() <= acip_core::SESSION_STRING_WIRE_LEN);
    }

    #[test]
    fn test_longest_possible_fits_wire_width() {
        let longest = WORDS.iter().map(|w| w.len()).max().unwrap();
        assert!(longest * 3 + 2 <= acip_core::SESSION_STRING_WIRE_LEN);
    }
}
