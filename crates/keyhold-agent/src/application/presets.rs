//! Named policy lists declared up front (in configuration) and installed as
//! a batch.
//!
//! Installing a batch pushes once per preset, since each registration must
//! be acknowledged before its ID can be handed out.  Tearing a batch down
//! is cheaper: every list is removed locally and each touched category is
//! committed once.

use keyhold_core::{Category, ListId, Rule};
use tracing::{info, warn};

use super::commit_policies::{PolicyCommitService, PolicyError};

/// A named list of rules for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub name: String,
    pub category: Category,
    pub rules: Vec<Rule>,
}

/// A preset the host has accepted, with the handle needed to remove it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPreset {
    pub name: String,
    pub category: Category,
    pub id: ListId,
}

/// Installs `presets` in order.
///
/// Stops at the first failure.  Presets installed before the failure are
/// torn down again, so on error the host ends up where it started.
///
/// # Errors
///
/// Returns the error of the preset that failed to install.
pub async fn install_presets(
    service: &PolicyCommitService,
    presets: &[Preset],
) -> Result<Vec<InstalledPreset>, PolicyError> {
    let mut installed = Vec::with_capacity(presets.len());
    for preset in presets {
        match service.add_policies(preset.category, preset.rules.clone()).await {
            Ok(id) => {
                info!(preset = %preset.name, category = %preset.category, list_id = %id, "preset installed");
                installed.push(InstalledPreset {
                    name: preset.name.clone(),
                    category: preset.category,
                    id,
                });
            }
            Err(e) => {
                warn!(preset = %preset.name, error = %e, "preset install failed; undoing batch");
                if let Err(undo) = uninstall_presets(service, &installed).await {
                    warn!(error = %undo, "could not undo partially installed presets");
                }
                return Err(e);
            }
        }
    }
    Ok(installed)
}

/// Removes `installed` presets and commits each touched category once.
///
/// Presets that are already gone are skipped.
///
/// # Errors
///
/// Returns the first commit failure.  The remaining categories are still
/// attempted.
pub async fn uninstall_presets(
    service: &PolicyCommitService,
    installed: &[InstalledPreset],
) -> Result<(), PolicyError> {
    let mut touched = [false; 2];
    for preset in installed {
        match service.remove_policies(preset.category, preset.id, false).await {
            Ok(()) => touched[preset.category.index()] = true,
            Err(PolicyError::NotFound { .. }) => {
                warn!(preset = %preset.name, list_id = %preset.id, "preset already removed");
            }
            Err(e) => return Err(e),
        }
    }

    let mut first_err = None;
    for category in Category::ALL {
        if !touched[category.index()] {
            continue;
        }
        if let Err(e) = service.commit(category).await {
            warn!(%category, error = %e, "commit after preset removal failed");
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
