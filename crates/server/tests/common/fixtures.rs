//! Test fixtures: tokens, configuration and generated data.

use bytes::Bytes;
use larder_core::config::{AppConfig, ControllerConfig};
use larder_core::{Permission, Scope, SetRule};

/// Bearer token of the admin controller from [`ControllerConfig::for_testing`].
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Bearer token of a controller with write scope.
#[allow(dead_code)]
pub const CI_TOKEN: &str = "test-ci-token";

/// SHA256 of [`CI_TOKEN`].
const CI_TOKEN_HASH: &str = "3190384987c65bd336cab7008092645b787125a4cf1db2e45b061f50bdecbcd6";

/// A public collection that takes direct uploads.
#[allow(dead_code)]
pub const IMAGES: &str = "images";

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Test configuration: admin and ci controllers plus the images collection.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::for_testing();
    config.controllers.push(ControllerConfig {
        caller: "ci".to_string(),
        token_hash: CI_TOKEN_HASH.to_string(),
        scope: Scope::Write,
        description: None,
    });
    config.collections.insert(
        IMAGES.to_string(),
        SetRule {
            read: Permission::Public,
            write: Permission::Controllers,
            max_size: None,
            proposal_required: false,
            version: None,
        },
    );
    config
}
