//! Stage Resolver.
//!
//! A lead's stage is a projection computed from the records downstream of
//! it, never trusted from mutable state. [`resolve`] is the pure decision
//! core; [`load_probes`] fills it from the store; the cached
//! `leads.current_stage` column is only advanced through [`advance`].

use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::shared::enums::PipelineStage;
use crate::core::shared::error::ApiError;
use crate::core::shared::schema::{
    agreements, kickoff_requests, lead_stage_history, leads, meetings, payment_verifications,
    pricing_plans, projects, quotations, sows,
};

/// Everything the resolver needs to know about a lead's downstream records.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageProbes {
    pub has_meeting: bool,
    pub has_meeting_with_mom: bool,
    pub has_pricing_plan: bool,
    pub pricing_approved: bool,
    pub has_sow: bool,
    pub sow_has_items: bool,
    pub has_quotation: bool,
    pub quotation_finalized: bool,
    pub has_agreement: bool,
    pub agreement_approved: bool,
    pub agreement_signed: bool,
    pub first_installment_verified: bool,
    pub has_kickoff_request: bool,
    pub kickoff_pending: bool,
    pub has_project: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSnapshot {
    pub current_stage: PipelineStage,
    pub next_stage: Option<PipelineStage>,
    pub stage_index: i16,
    pub total_stages: usize,
    pub can_progress: bool,
}

/// Compute the stage by probing in descending order for the furthest
/// advancing record, then decide whether the next stage's precondition is
/// satisfiable right now.
pub fn resolve(probes: &StageProbes) -> StageSnapshot {
    let current_stage = if probes.has_project {
        PipelineStage::Closed
    } else if probes.has_kickoff_request {
        PipelineStage::Kickoff
    } else if probes.agreement_signed {
        PipelineStage::Payment
    } else if probes.has_agreement {
        PipelineStage::Agreement
    } else if probes.has_quotation {
        PipelineStage::Quotation
    } else if probes.has_sow {
        PipelineStage::Sow
    } else if probes.has_pricing_plan {
        PipelineStage::Pricing
    } else if probes.has_meeting {
        PipelineStage::Meeting
    } else {
        PipelineStage::Lead
    };

    let can_progress = match current_stage {
        PipelineStage::Lead => true,
        PipelineStage::Meeting => probes.has_meeting_with_mom,
        PipelineStage::Pricing => probes.pricing_approved,
        PipelineStage::Sow => probes.sow_has_items,
        PipelineStage::Quotation => probes.quotation_finalized,
        PipelineStage::Agreement => probes.agreement_approved,
        PipelineStage::Payment => probes.first_installment_verified,
        PipelineStage::Kickoff => probes.kickoff_pending,
        PipelineStage::Closed => false,
    };

    StageSnapshot {
        current_stage,
        next_stage: current_stage.next(),
        stage_index: current_stage.index(),
        total_stages: PipelineStage::TOTAL,
        can_progress,
    }
}

pub fn load_probes(conn: &mut PgConnection, lead_id: Uuid) -> Result<StageProbes, ApiError> {
    use crate::core::shared::enums::{AgreementStatus, KickoffStatus, PlanStatus};

    let mut probes = StageProbes::default();

    probes.has_meeting = diesel::select(diesel::dsl::exists(
        meetings::table.filter(meetings::lead_id.eq(lead_id)),
    ))
    .get_result(conn)?;
    probes.has_meeting_with_mom = diesel::select(diesel::dsl::exists(
        meetings::table
            .filter(meetings::lead_id.eq(lead_id))
            .filter(meetings::discussion_points.is_not_null()),
    ))
    .get_result(conn)?;

    probes.has_pricing_plan = diesel::select(diesel::dsl::exists(
        pricing_plans::table.filter(pricing_plans::lead_id.eq(lead_id)),
    ))
    .get_result(conn)?;
    probes.pricing_approved = diesel::select(diesel::dsl::exists(
        pricing_plans::table
            .filter(pricing_plans::lead_id.eq(lead_id))
            .filter(pricing_plans::status.eq(PlanStatus::Approved)),
    ))
    .get_result(conn)?;

    let sow: Option<serde_json::Value> = sows::table
        .filter(sows::lead_id.eq(lead_id))
        .select(sows::items)
        .first(conn)
        .optional()?;
    if let Some(items) = sow {
        probes.has_sow = true;
        probes.sow_has_items = items.as_array().map(|a| !a.is_empty()).unwrap_or(false);
    }

    let quotation: Option<bool> = quotations::table
        .filter(quotations::lead_id.eq(lead_id))
        .select(quotations::is_final)
        .order(quotations::created_at.desc())
        .first(conn)
        .optional()?;
    if let Some(is_final) = quotation {
        probes.has_quotation = true;
        probes.quotation_finalized = is_final;
    }

    let agreement: Option<(Uuid, AgreementStatus)> = agreements::table
        .filter(agreements::lead_id.eq(lead_id))
        .select((agreements::id, agreements::status))
        .order(agreements::created_at.desc())
        .first(conn)
        .optional()?;
    if let Some((agreement_id, status)) = agreement {
        probes.has_agreement = true;
        probes.agreement_approved = status >= AgreementStatus::Approved;
        probes.agreement_signed = status == AgreementStatus::Signed;
        probes.first_installment_verified = diesel::select(diesel::dsl::exists(
            payment_verifications::table
                .filter(payment_verifications::agreement_id.eq(agreement_id))
                .filter(payment_verifications::installment_number.eq(1)),
        ))
        .get_result(conn)?;
    }

    probes.has_kickoff_request = diesel::select(diesel::dsl::exists(
        kickoff_requests::table.filter(kickoff_requests::lead_id.eq(lead_id)),
    ))
    .get_result(conn)?;
    probes.kickoff_pending = diesel::select(diesel::dsl::exists(
        kickoff_requests::table
            .filter(kickoff_requests::lead_id.eq(lead_id))
            .filter(kickoff_requests::status.eq(KickoffStatus::Pending)),
    ))
    .get_result(conn)?;

    probes.has_project = diesel::select(diesel::dsl::exists(
        projects::table.filter(projects::lead_id.eq(lead_id)),
    ))
    .get_result(conn)?;

    Ok(probes)
}

/// Advance the cached stage after a qualifying downstream write. Only the
/// immediate next stage is accepted; anything else is logged and ignored so
/// a replayed event can never skip the lead forward.
pub fn advance(conn: &mut PgConnection, lead_id: Uuid, stage: PipelineStage) -> Result<(), ApiError> {
    let current: PipelineStage = leads::table
        .filter(leads::id.eq(lead_id))
        .select(leads::current_stage)
        .first(conn)?;

    if stage <= current {
        return Ok(());
    }
    if current.next() != Some(stage) {
        warn!(
            "lead {} stage advance {} -> {} skips ahead, ignoring",
            lead_id, current, stage
        );
        return Ok(());
    }

    record_stage(conn, lead_id, stage)?;
    info!("lead {} advanced to {}", lead_id, stage);
    Ok(())
}

/// Admin-only explicit reset to an arbitrary stage.
pub fn reset(conn: &mut PgConnection, lead_id: Uuid, stage: PipelineStage) -> Result<(), ApiError> {
    record_stage(conn, lead_id, stage)?;
    info!("lead {} stage reset to {}", lead_id, stage);
    Ok(())
}

fn record_stage(
    conn: &mut PgConnection,
    lead_id: Uuid,
    stage: PipelineStage,
) -> Result<(), ApiError> {
    diesel::update(leads::table.filter(leads::id.eq(lead_id)))
        .set((
            leads::current_stage.eq(stage),
            leads::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    diesel::insert_into(lead_stage_history::table)
        .values((
            lead_stage_history::id.eq(Uuid::new_v4()),
            lead_stage_history::lead_id.eq(lead_id),
            lead_stage_history::stage.eq(stage),
            lead_stage_history::entered_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lead_sits_at_lead_stage() {
        let snapshot = resolve(&StageProbes::default());
        assert_eq!(snapshot.current_stage, PipelineStage::Lead);
        assert_eq!(snapshot.next_stage, Some(PipelineStage::Meeting));
        assert_eq!(snapshot.stage_index, 0);
        assert_eq!(snapshot.total_stages, 9);
        assert!(snapshot.can_progress);
    }

    #[test]
    fn meeting_without_mom_blocks_progress() {
        let probes = StageProbes {
            has_meeting: true,
            ..Default::default()
        };
        let snapshot = resolve(&probes);
        assert_eq!(snapshot.current_stage, PipelineStage::Meeting);
        assert!(!snapshot.can_progress);

        let probes = StageProbes {
            has_meeting: true,
            has_meeting_with_mom: true,
            ..Default::default()
        };
        assert!(resolve(&probes).can_progress);
    }

    #[test]
    fn pending_pricing_blocks_sow_creation() {
        let probes = StageProbes {
            has_meeting: true,
            has_meeting_with_mom: true,
            has_pricing_plan: true,
            ..Default::default()
        };
        let snapshot = resolve(&probes);
        assert_eq!(snapshot.current_stage, PipelineStage::Pricing);
        assert!(!snapshot.can_progress);
    }

    #[test]
    fn signed_agreement_lands_on_payment_stage() {
        let probes = StageProbes {
            has_meeting: true,
            has_meeting_with_mom: true,
            has_pricing_plan: true,
            pricing_approved: true,
            has_sow: true,
            sow_has_items: true,
            has_quotation: true,
            quotation_finalized: true,
            has_agreement: true,
            agreement_approved: true,
            agreement_signed: true,
            ..Default::default()
        };
        let snapshot = resolve(&probes);
        assert_eq!(snapshot.current_stage, PipelineStage::Payment);
        assert!(!snapshot.can_progress);

        let probes = StageProbes {
            first_installment_verified: true,
            ..probes
        };
        assert!(resolve(&probes).can_progress);
    }

    #[test]
    fn kickoff_request_dominates_payment_probes() {
        let probes = StageProbes {
            agreement_signed: true,
            has_agreement: true,
            first_installment_verified: true,
            has_kickoff_request: true,
            kickoff_pending: true,
            ..Default::default()
        };
        let snapshot = resolve(&probes);
        assert_eq!(snapshot.current_stage, PipelineStage::Kickoff);
        assert!(snapshot.can_progress);
    }

    #[test]
    fn project_closes_the_funnel() {
        let probes = StageProbes {
            has_project: true,
            has_kickoff_request: true,
            ..Default::default()
        };
        let snapshot = resolve(&probes);
        assert_eq!(snapshot.current_stage, PipelineStage::Closed);
        assert_eq!(snapshot.next_stage, None);
        assert!(!snapshot.can_progress);
    }
}
