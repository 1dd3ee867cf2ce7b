//! Random identifiers for instances, messages, and correlation.

use rand::distr::Alphanumeric;
use rand::Rng;

/// Length of generated instance, message, and correlation ids.
pub const ID_LEN: usize = 20;

/// A random alphanumeric string of `len` characters.
pub fn random_id(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
