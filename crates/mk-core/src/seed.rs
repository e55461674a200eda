//! Seed acquisition for reproducible runs.
//!
//! Every randomized driver derives its worker RNG streams from one base
//! seed. The seed comes from the `MK_SEED` environment variable when set,
//! otherwise from entropy, and is printed either way so a run can be
//! reproduced with `MK_SEED=<seed>`.

/// Get the run seed from the environment or generate a random one.
///
/// Prints the seed for reproduction.
#[must_use]
pub fn seed_from_env() -> u64 {
    match std::env::var("MK_SEED") {
        Ok(s) => {
            let seed: u64 = s.parse().expect("MK_SEED must be a valid u64");
            println!("MK_SEED={} (from environment)", seed);
            seed
        }
        Err(_) => {
            let seed = rand::random::<u64>();
            println!("MK_SEED={} (randomly generated)", seed);
            seed
        }
    }
}
