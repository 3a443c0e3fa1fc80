//! Database Enum Types for the Sales-to-Delivery Pipeline
//!
//! Rust enums that map directly to PostgreSQL `SMALLINT` columns. Using
//! enums instead of TEXT columns provides:
//! - Type safety at compile time
//! - Efficient storage and indexing
//! - Automatic validation at the serialization boundary
//!
//! All enums derive the traits needed for Diesel ORM integration.

use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, Output, ToSql};
use diesel::sql_types::SmallInt;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use std::io::Write;

// ============================================================================
// PIPELINE STAGES
// ============================================================================

/// The nine stages of the sales funnel, in pipeline order.
///
/// The discriminants define a total order: a lead only ever moves toward
/// `Closed`, one stage at a time, and the derived `Ord` is the authority on
/// which stage comes first.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    AsExpression,
    FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PipelineStage {
    Lead = 0,
    Meeting = 1,
    Pricing = 2,
    Sow = 3,
    Quotation = 4,
    Agreement = 5,
    Payment = 6,
    Kickoff = 7,
    Closed = 8,
}

impl PipelineStage {
    pub const TOTAL: usize = 9;

    pub fn index(self) -> i16 {
        self as i16
    }

    /// The stage that immediately follows this one, if any.
    pub fn next(self) -> Option<Self> {
        Self::from_i16(self as i16 + 1)
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Lead),
            1 => Some(Self::Meeting),
            2 => Some(Self::Pricing),
            3 => Some(Self::Sow),
            4 => Some(Self::Quotation),
            5 => Some(Self::Agreement),
            6 => Some(Self::Payment),
            7 => Some(Self::Kickoff),
            8 => Some(Self::Closed),
            _ => None,
        }
    }
}

impl Default for PipelineStage {
    fn default() -> Self {
        Self::Lead
    }
}

impl ToSql<SmallInt, Pg> for PipelineStage {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for PipelineStage {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        Self::from_i16(value).ok_or_else(|| format!("Unknown PipelineStage: {}", value).into())
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lead => "lead",
            Self::Meeting => "meeting",
            Self::Pricing => "pricing",
            Self::Sow => "sow",
            Self::Quotation => "quotation",
            Self::Agreement => "agreement",
            Self::Payment => "payment",
            Self::Kickoff => "kickoff",
            Self::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// USER ROLES & CAPABILITIES
// ============================================================================

/// Closed set of actor roles. Role checks go through [`Capabilities`], never
/// through string comparison.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum UserRole {
    Admin = 0,
    SalesManager = 1,
    SalesExecutive = 2,
    ProjectManager = 3,
    HrManager = 4,
    Finance = 5,
}

/// What a role is allowed to do across the pipeline. One row per role,
/// resolved once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Create and resubmit kickoff requests (the sales side of the funnel).
    pub can_submit_kickoff: bool,
    /// Accept, return or reject kickoff requests (the delivery side).
    pub can_review_kickoff: bool,
    /// Eligible to vote on approval requests (the per-request role
    /// allow-list still applies on top of this).
    pub can_approve: bool,
    /// Contract financials are visible in project payloads.
    pub can_see_financials: bool,
    pub can_manage_users: bool,
    /// Mutate a frozen statement of work.
    pub can_edit_frozen_sow: bool,
}

impl UserRole {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Admin => Capabilities {
                can_submit_kickoff: true,
                can_review_kickoff: true,
                can_approve: true,
                can_see_financials: true,
                can_manage_users: true,
                can_edit_frozen_sow: true,
            },
            Self::SalesManager => Capabilities {
                can_submit_kickoff: true,
                can_review_kickoff: false,
                can_approve: true,
                can_see_financials: true,
                can_manage_users: false,
                can_edit_frozen_sow: false,
            },
            Self::SalesExecutive => Capabilities {
                can_submit_kickoff: true,
                can_review_kickoff: false,
                can_approve: false,
                can_see_financials: false,
                can_manage_users: false,
                can_edit_frozen_sow: false,
            },
            Self::ProjectManager => Capabilities {
                can_submit_kickoff: false,
                can_review_kickoff: true,
                can_approve: false,
                can_see_financials: false,
                can_manage_users: false,
                can_edit_frozen_sow: false,
            },
            Self::HrManager => Capabilities {
                can_submit_kickoff: false,
                can_review_kickoff: false,
                can_approve: true,
                can_see_financials: false,
                can_manage_users: false,
                can_edit_frozen_sow: false,
            },
            Self::Finance => Capabilities {
                can_submit_kickoff: false,
                can_review_kickoff: false,
                can_approve: true,
                can_see_financials: true,
                can_manage_users: false,
                can_edit_frozen_sow: false,
            },
        }
    }

    pub fn is_admin(self) -> bool {
        matches!(self, Self::Admin)
    }

    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Admin),
            1 => Some(Self::SalesManager),
            2 => Some(Self::SalesExecutive),
            3 => Some(Self::ProjectManager),
            4 => Some(Self::HrManager),
            5 => Some(Self::Finance),
            _ => None,
        }
    }
}

impl ToSql<SmallInt, Pg> for UserRole {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for UserRole {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        let value = i16::from_sql(bytes)?;
        Self::from_i16(value).ok_or_else(|| format!("Unknown UserRole: {}", value).into())
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Admin => "admin",
            Self::SalesManager => "sales_manager",
            Self::SalesExecutive => "sales_executive",
            Self::ProjectManager => "project_manager",
            Self::HrManager => "hr_manager",
            Self::Finance => "finance",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// LEAD STATUS
// ============================================================================

/// Leads are never deleted, only soft-closed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum LeadStatus {
    Open = 0,
    Closed = 1,
}

impl Default for LeadStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl ToSql<SmallInt, Pg> for LeadStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for LeadStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match i16::from_sql(bytes)? {
            0 => Ok(Self::Open),
            1 => Ok(Self::Closed),
            v => Err(format!("Unknown LeadStatus: {}", v).into()),
        }
    }
}

// ============================================================================
// APPROVAL GATE
// ============================================================================

/// Lifecycle of an approval request. `Approved` and `Rejected` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ApprovalStatus {
    Pending = 0,
    Approved = 1,
    Rejected = 2,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl ToSql<SmallInt, Pg> for ApprovalStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for ApprovalStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match i16::from_sql(bytes)? {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Approved),
            2 => Ok(Self::Rejected),
            v => Err(format!("Unknown ApprovalStatus: {}", v).into()),
        }
    }
}

/// Which kind of record an approval request gates. The gate is generic; the
/// entity type decides whose status flips when the request resolves.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ApprovalEntity {
    PricingPlan = 0,
    Ctc = 1,
    Agreement = 2,
}

impl ToSql<SmallInt, Pg> for ApprovalEntity {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for ApprovalEntity {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match i16::from_sql(bytes)? {
            0 => Ok(Self::PricingPlan),
            1 => Ok(Self::Ctc),
            2 => Ok(Self::Agreement),
            v => Err(format!("Unknown ApprovalEntity: {}", v).into()),
        }
    }
}

impl std::fmt::Display for ApprovalEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PricingPlan => "pricing_plan",
            Self::Ctc => "ctc",
            Self::Agreement => "agreement",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// PRICING PLAN STATUS
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PlanStatus {
    Draft = 0,
    Pending = 1,
    Approved = 2,
    Rejected = 3,
}

impl Default for PlanStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl ToSql<SmallInt, Pg> for PlanStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for PlanStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match i16::from_sql(bytes)? {
            0 => Ok(Self::Draft),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Approved),
            3 => Ok(Self::Rejected),
            v => Err(format!("Unknown PlanStatus: {}", v).into()),
        }
    }
}

// ============================================================================
// AGREEMENT STATUS
// ============================================================================

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    AsExpression,
    FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum AgreementStatus {
    Draft = 0,
    Approved = 1,
    Signed = 2,
}

impl ToSql<SmallInt, Pg> for AgreementStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for AgreementStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match i16::from_sql(bytes)? {
            0 => Ok(Self::Draft),
            1 => Ok(Self::Approved),
            2 => Ok(Self::Signed),
            v => Err(format!("Unknown AgreementStatus: {}", v).into()),
        }
    }
}

// ============================================================================
// KICKOFF WORKFLOW
// ============================================================================

/// States of a kickoff request. `Converted` and `Rejected` are terminal;
/// `Pending` and `Returned` count as active for the one-per-agreement rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum KickoffStatus {
    Pending = 0,
    Returned = 1,
    Converted = 2,
    Rejected = 3,
}

impl KickoffStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converted | Self::Rejected)
    }

    /// Active requests block creation of another one for the same agreement.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Returned)
    }
}

impl ToSql<SmallInt, Pg> for KickoffStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for KickoffStatus {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match i16::from_sql(bytes)? {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Returned),
            2 => Ok(Self::Converted),
            3 => Ok(Self::Rejected),
            v => Err(format!("Unknown KickoffStatus: {}", v).into()),
        }
    }
}

impl std::fmt::Display for KickoffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Returned => "returned",
            Self::Converted => "converted",
            Self::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// SOW VERSION HISTORY
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum SowChangeType {
    Created = 0,
    ItemAdded = 1,
    ItemUpdated = 2,
}

impl ToSql<SmallInt, Pg> for SowChangeType {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for SowChangeType {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match i16::from_sql(bytes)? {
            0 => Ok(Self::Created),
            1 => Ok(Self::ItemAdded),
            2 => Ok(Self::ItemUpdated),
            v => Err(format!("Unknown SowChangeType: {}", v).into()),
        }
    }
}

// ============================================================================
// PAYMENTS
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum PaymentMode {
    BankTransfer = 0,
    Upi = 1,
    Cheque = 2,
    Cash = 3,
}

impl ToSql<SmallInt, Pg> for PaymentMode {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for PaymentMode {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match i16::from_sql(bytes)? {
            0 => Ok(Self::BankTransfer),
            1 => Ok(Self::Upi),
            2 => Ok(Self::Cheque),
            3 => Ok(Self::Cash),
            v => Err(format!("Unknown PaymentMode: {}", v).into()),
        }
    }
}

// ============================================================================
// MEETINGS
// ============================================================================

/// Sales meetings hang off a lead, consulting meetings off a project, and
/// kickoff meetings off an agreement.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = SmallInt)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum MeetingKind {
    Sales = 0,
    Kickoff = 1,
    Consulting = 2,
}

impl ToSql<SmallInt, Pg> for MeetingKind {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let v = *self as i16;
        out.write_all(&v.to_be_bytes())?;
        Ok(serialize::IsNull::No)
    }
}

impl FromSql<SmallInt, Pg> for MeetingKind {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match i16::from_sql(bytes)? {
            0 => Ok(Self::Sales),
            1 => Ok(Self::Kickoff),
            2 => Ok(Self::Consulting),
            v => Err(format!("Unknown MeetingKind: {}", v).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_total_and_strict() {
        let stages = [
            PipelineStage::Lead,
            PipelineStage::Meeting,
            PipelineStage::Pricing,
            PipelineStage::Sow,
            PipelineStage::Quotation,
            PipelineStage::Agreement,
            PipelineStage::Payment,
            PipelineStage::Kickoff,
            PipelineStage::Closed,
        ];
        assert_eq!(stages.len(), PipelineStage::TOTAL);
        for pair in stages.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn stage_next_walks_the_whole_funnel() {
        let mut stage = PipelineStage::Lead;
        let mut hops = 0;
        while let Some(next) = stage.next() {
            assert_eq!(next.index(), stage.index() + 1);
            stage = next;
            hops += 1;
        }
        assert_eq!(stage, PipelineStage::Closed);
        assert_eq!(hops, PipelineStage::TOTAL - 1);
    }

    #[test]
    fn stage_roundtrips_through_i16() {
        for i in 0..PipelineStage::TOTAL as i16 {
            let stage = PipelineStage::from_i16(i).unwrap();
            assert_eq!(stage.index(), i);
        }
        assert!(PipelineStage::from_i16(9).is_none());
        assert!(PipelineStage::from_i16(-1).is_none());
    }

    #[test]
    fn sales_roles_cannot_review_kickoffs() {
        for role in [UserRole::SalesManager, UserRole::SalesExecutive] {
            let caps = role.capabilities();
            assert!(caps.can_submit_kickoff);
            assert!(!caps.can_review_kickoff);
        }
    }

    #[test]
    fn project_manager_is_reviewer_without_financials() {
        let caps = UserRole::ProjectManager.capabilities();
        assert!(caps.can_review_kickoff);
        assert!(!caps.can_see_financials);
        assert!(!caps.can_submit_kickoff);
        assert!(!caps.can_edit_frozen_sow);
    }

    #[test]
    fn only_admin_edits_frozen_documents() {
        for v in 0..6 {
            let role = UserRole::from_i16(v).unwrap();
            assert_eq!(role.capabilities().can_edit_frozen_sow, role.is_admin());
        }
    }

    #[test]
    fn kickoff_terminal_and_active_are_disjoint() {
        for status in [
            KickoffStatus::Pending,
            KickoffStatus::Returned,
            KickoffStatus::Converted,
            KickoffStatus::Rejected,
        ] {
            assert_ne!(status.is_terminal(), status.is_active());
        }
    }
}
