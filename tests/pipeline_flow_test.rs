//! End-to-end walk of the sales-to-delivery pipeline over the pure workflow
//! layer: lead capture through dual pricing sign-off, quotation totals,
//! payment eligibility, kickoff review and project staffing.

use bigdecimal::BigDecimal;
use std::str::FromStr;

use erpserver::agreements::TeamDeployment;
use erpserver::approvals::apply_vote;
use erpserver::core::shared::enums::{
    AgreementStatus, ApprovalStatus, KickoffStatus, PipelineStage, UserRole,
};
use erpserver::kickoff::{check_transition, staffing_requirements, KickoffAction};
use erpserver::leads::stage::{resolve, StageProbes};
use erpserver::payments::eligibility;
use erpserver::quotations::compute_grand_total;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

#[test]
fn lead_walks_the_full_funnel() {
    // Freshly captured lead.
    let mut probes = StageProbes::default();
    let snapshot = resolve(&probes);
    assert_eq!(snapshot.current_stage, PipelineStage::Lead);
    assert!(snapshot.can_progress);

    // Sales meeting held, minutes recorded.
    probes.has_meeting = true;
    assert_eq!(resolve(&probes).current_stage, PipelineStage::Meeting);
    assert!(!resolve(&probes).can_progress);
    probes.has_meeting_with_mom = true;
    assert!(resolve(&probes).can_progress);

    // Pricing plan drafted, then approved by sales manager + admin.
    probes.has_pricing_plan = true;
    assert_eq!(resolve(&probes).current_stage, PipelineStage::Pricing);
    assert!(!resolve(&probes).can_progress);

    let (status, count) = apply_vote(ApprovalStatus::Pending, 0, 2, true, None).unwrap();
    assert_eq!(status, ApprovalStatus::Pending);
    let (status, _) = apply_vote(status, count, 2, true, None).unwrap();
    assert_eq!(status, ApprovalStatus::Approved);
    probes.pricing_approved = true;
    assert!(resolve(&probes).can_progress);

    // Statement of work with one item.
    probes.has_sow = true;
    probes.sow_has_items = true;
    assert_eq!(resolve(&probes).current_stage, PipelineStage::Sow);
    assert!(resolve(&probes).can_progress);

    // Quotation: 118000 - 0 + 18000 = 136000, then finalized.
    let grand_total = compute_grand_total(&dec("118000"), &dec("0"), &dec("18000")).unwrap();
    assert_eq!(grand_total, dec("136000"));
    probes.has_quotation = true;
    probes.quotation_finalized = true;
    assert_eq!(resolve(&probes).current_stage, PipelineStage::Quotation);
    assert!(resolve(&probes).can_progress);

    // Agreement approved by a single qualifying approver, then signed.
    let (status, _) = apply_vote(ApprovalStatus::Pending, 0, 1, true, None).unwrap();
    assert_eq!(status, ApprovalStatus::Approved);
    probes.has_agreement = true;
    probes.agreement_approved = true;
    assert_eq!(resolve(&probes).current_stage, PipelineStage::Agreement);
    assert!(resolve(&probes).can_progress);
    probes.agreement_signed = true;
    assert_eq!(resolve(&probes).current_stage, PipelineStage::Payment);

    // Installment 1 verified: kickoff becomes creatable.
    assert!(!eligibility(AgreementStatus::Signed, false, false).is_eligible);
    let decision = eligibility(AgreementStatus::Signed, true, true);
    assert!(decision.is_eligible);
    probes.first_installment_verified = true;
    assert!(resolve(&probes).can_progress);

    // Kickoff request submitted and accepted by the project manager.
    probes.has_kickoff_request = true;
    probes.kickoff_pending = true;
    assert_eq!(resolve(&probes).current_stage, PipelineStage::Kickoff);
    assert!(UserRole::ProjectManager.capabilities().can_review_kickoff);
    assert_eq!(
        check_transition(KickoffStatus::Pending, KickoffAction::Accept).unwrap(),
        KickoffStatus::Converted
    );

    // Project materialized: funnel closed.
    probes.has_project = true;
    let snapshot = resolve(&probes);
    assert_eq!(snapshot.current_stage, PipelineStage::Closed);
    assert_eq!(snapshot.next_stage, None);
    assert!(!snapshot.can_progress);
}

#[test]
fn return_and_resubmit_round_trip() {
    let returned = check_transition(KickoffStatus::Pending, KickoffAction::Return).unwrap();
    assert_eq!(returned, KickoffStatus::Returned);

    // A returned request cannot be accepted until resubmitted.
    assert!(check_transition(returned, KickoffAction::Accept).is_err());

    let pending = check_transition(returned, KickoffAction::Resubmit).unwrap();
    assert_eq!(pending, KickoffStatus::Pending);
    assert_eq!(
        check_transition(pending, KickoffAction::Accept).unwrap(),
        KickoffStatus::Converted
    );
}

#[test]
fn accept_is_exactly_once() {
    let converted = check_transition(KickoffStatus::Pending, KickoffAction::Accept).unwrap();
    let err = check_transition(converted, KickoffAction::Accept).unwrap_err();
    assert!(err.detail().contains("already"));
    assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
}

#[test]
fn second_resolution_of_an_approval_fails() {
    let (status, count) = apply_vote(ApprovalStatus::Pending, 0, 1, true, None).unwrap();
    assert_eq!(status, ApprovalStatus::Approved);

    let err = apply_vote(status, count, 1, true, None).unwrap_err();
    assert!(err.detail().contains("already"));
    let err = apply_vote(status, count, 1, false, Some("too late")).unwrap_err();
    assert!(err.detail().contains("already"));
}

#[test]
fn deployment_roster_becomes_staffing_requirements() {
    let roster = vec![
        TeamDeployment {
            role: "recruiter".to_string(),
            meeting_type: "standup".to_string(),
            frequency: "daily".to_string(),
            mode: "remote".to_string(),
        },
        TeamDeployment {
            role: "recruiter".to_string(),
            meeting_type: "review".to_string(),
            frequency: "weekly".to_string(),
            mode: "onsite".to_string(),
        },
        TeamDeployment {
            role: "payroll_specialist".to_string(),
            meeting_type: "review".to_string(),
            frequency: "monthly".to_string(),
            mode: "remote".to_string(),
        },
    ];
    let requirements = staffing_requirements(&roster);
    assert_eq!(requirements.len(), 2);
    assert_eq!(requirements[0].role, "recruiter");
    assert_eq!(requirements[0].headcount, 2);
    assert_eq!(requirements[1].role, "payroll_specialist");
    assert_eq!(requirements[1].headcount, 1);
}

#[test]
fn role_gates_match_the_capability_table() {
    // Sales side may create and resubmit, never review.
    for role in [UserRole::SalesManager, UserRole::SalesExecutive] {
        assert!(role.capabilities().can_submit_kickoff);
        assert!(!role.capabilities().can_review_kickoff);
    }
    // Delivery side reviews but does not submit.
    assert!(UserRole::ProjectManager.capabilities().can_review_kickoff);
    assert!(!UserRole::ProjectManager.capabilities().can_submit_kickoff);
    // Financial visibility stays away from project managers.
    assert!(!UserRole::ProjectManager.capabilities().can_see_financials);
    assert!(UserRole::Finance.capabilities().can_see_financials);
}
