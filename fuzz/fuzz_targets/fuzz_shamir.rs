#![no_main]

use arbitrary::Arbitrary;
use keyward_core::{ElementType, SecretConfig, Shamir, Share};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    threshold: u8,
    shares: Vec<(u32, [u8; 32])>,
}

fuzz_target!(|input: Input| {
    let threshold = (input.threshold as usize % 8).max(1);
    let config = SecretConfig::new(8, threshold, ElementType::Bn254Fr);
    let Ok(shamir) = Shamir::new(config) else {
        return;
    };

    // Arbitrary share sets must fail cleanly or yield a key of the right length
    let shares: Vec<Share> = input
        .shares
        .into_iter()
        .map(|(x, y)| Share::new(x, y.to_vec()))
        .collect();
    if let Ok(key) = shamir.reconstruct(&shares) {
        assert_eq!(key.len(), config.key_len);
    }
});
