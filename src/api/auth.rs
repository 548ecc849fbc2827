//! Challenge-response authentication for the operator protocol
//!
//! A newly connected client is issued a random challenge and must prove it
//! knows the user's secret by responding with
//! `sha1_hex(challenge + " " + secret)`.

use std::collections::HashMap;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::error::{ZinoError, ZinoResult};

/// Returns a new authentication challenge string: 40 hex characters of
/// unpredictable material
pub fn get_challenge() -> String {
    let mut noise = [0u8; 40];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut noise);
    let mut hasher = Sha1::new();
    hasher.update(noise);
    hex::encode(hasher.finalize())
}

/// Computes the expected response for a challenge and secret
pub fn expected_response(challenge: &str, secret: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{} {}", challenge, secret).as_bytes());
    hex::encode(hasher.finalize())
}

/// Verifies a user's challenge response against the secrets database
pub fn authenticate(
    user: &str,
    response: &str,
    challenge: &str,
    users: &HashMap<String, String>,
) -> ZinoResult<()> {
    let secret = users
        .get(user)
        .ok_or_else(|| ZinoError::Authentication("no such user".to_string()))?;
    if response == expected_response(challenge, secret) {
        Ok(())
    } else {
        Err(ZinoError::Authentication("bad response".to_string()))
    }
}

/// Reads the `username secret` file.  Blank lines are allowed; anything
/// after the first space on a line belongs to the secret.  A world-readable
/// secrets file is refused outright.
pub fn read_users(path: &Path) -> ZinoResult<HashMap<String, String>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::metadata(path)
            .map_err(|error| {
                ZinoError::Configuration(format!("secrets file {}: {}", path.display(), error))
            })?
            .permissions();
        if permissions.mode() & 0o004 != 0 {
            return Err(ZinoError::Configuration(format!(
                "secrets file {} is world-readable",
                path.display()
            )));
        }
    }
    let content = std::fs::read_to_string(path).map_err(|error| {
        ZinoError::Configuration(format!("secrets file {}: {}", path.display(), error))
    })?;
    let mut users = HashMap::new();
    for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
        match line.split_once(' ') {
            Some((user, secret)) => {
                users.insert(user.to_string(), secret.trim().to_string());
            }
            None => {
                return Err(ZinoError::Configuration(format!(
                    "secrets file {}: malformed line",
                    path.display()
                )))
            }
        }
    }
    Ok(users)
}
