//! `latchkey validate`

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Result, bail};

use super::read_policies;

pub fn run(path: &Path) -> Result<()> {
    let policies = read_policies(path)?;

    let mut seen = HashSet::new();
    let mut failures = 0usize;
    for policy in &policies {
        let verdict = if seen.insert(policy.id.clone()) {
            policy.validate().map_err(|e| e.to_string())
        } else {
            Err(format!("duplicate policy id {}", policy.id))
        };
        match verdict {
            Ok(()) => println!("ok      {} ({:?}, priority {})", policy.id, policy.effect, policy.priority),
            Err(reason) => {
                failures += 1;
                println!("invalid {}: {reason}", policy.id);
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} policies are invalid", policies.len());
    }
    println!("{} policies valid", policies.len());
    Ok(())
}
