//! Position Reconciler (§4.10).
//!
//! Every 30s, reads active positions on both venues and closes orphan or
//! direction-mismatched mirror positions at market. Never opens positions —
//! those only arise via the placement pipeline or the immediate-fill
//! executor.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ReconcileError;
use crate::exchange::{MirrorClient, SourceClient};
use crate::margin_guard::MarginModeGuard;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileAction {
    ClosedOrphan { contract: String },
    ClosedMismatch { contract: String },
    NoAction,
}

pub struct PositionReconciler {
    source: Arc<dyn SourceClient>,
    mirror: Arc<dyn MirrorClient>,
    margin_guard: Arc<MarginModeGuard>,
}

impl PositionReconciler {
    pub fn new(source: Arc<dyn SourceClient>, mirror: Arc<dyn MirrorClient>, margin_guard: Arc<MarginModeGuard>) -> Self {
        Self { source, mirror, margin_guard }
    }

    /// Scans one contract: closes the mirror position if the source is flat
    /// and the mirror isn't (excluding startup positions), or if both hold
    /// but in opposite directions.
    pub async fn reconcile_contract(&self, contract: &str, startup_mirror_positions: &HashSet<String>) -> Result<ReconcileAction, ReconcileError> {
        let source_positions = self.source.get_positions(contract).await?;
        let mirror_positions = self.mirror.get_positions(contract).await?;

        let source_flat = source_positions.iter().all(|p| p.is_flat());
        let Some(mirror_pos) = mirror_positions.iter().find(|p| !p.is_flat()) else {
            return Ok(ReconcileAction::NoAction);
        };

        if source_flat {
            if startup_mirror_positions.contains(contract) {
                return Ok(ReconcileAction::NoAction);
            }
            self.margin_guard.ensure_cross(contract).await;
            self.mirror.close_position(contract).await?;
            return Ok(ReconcileAction::ClosedOrphan { contract: contract.to_string() });
        }

        let source_pos = source_positions.iter().find(|p| !p.is_flat());
        if let Some(source_pos) = source_pos {
            if source_pos.direction != mirror_pos.direction {
                self.margin_guard.ensure_cross(contract).await;
                self.mirror.close_position(contract).await?;
                return Ok(ReconcileAction::ClosedMismatch { contract: contract.to_string() });
            }
        }

        Ok(ReconcileAction::NoAction)
    }
}
