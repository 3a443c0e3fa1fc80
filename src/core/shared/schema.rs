diesel::table! {
    users (id) {
        id -> Uuid,
        full_name -> Text,
        email -> Text,
        password_hash -> Text,
        role -> Int2,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    leads (id) {
        id -> Uuid,
        lead_number -> Varchar,
        company -> Text,
        contact_name -> Text,
        contact_email -> Nullable<Text>,
        estimated_value -> Nullable<Numeric>,
        status -> Int2,
        current_stage -> Int2,
        assigned_to -> Nullable<Uuid>,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    lead_stage_history (id) {
        id -> Uuid,
        lead_id -> Uuid,
        stage -> Int2,
        entered_at -> Timestamptz,
    }
}

diesel::table! {
    meetings (id) {
        id -> Uuid,
        lead_id -> Nullable<Uuid>,
        project_id -> Nullable<Uuid>,
        agreement_id -> Nullable<Uuid>,
        kind -> Int2,
        title -> Text,
        scheduled_at -> Timestamptz,
        discussion_points -> Nullable<Text>,
        decisions_made -> Nullable<Text>,
        action_items -> Nullable<Text>,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    pricing_plans (id) {
        id -> Uuid,
        lead_id -> Uuid,
        title -> Text,
        engagement_model -> Nullable<Text>,
        total_value -> Numeric,
        notes -> Nullable<Text>,
        status -> Int2,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    approval_requests (id) {
        id -> Uuid,
        entity_type -> Int2,
        entity_id -> Uuid,
        requested_by -> Uuid,
        allowed_roles -> Array<Int2>,
        required_approvers -> Int4,
        approvals_count -> Int4,
        status -> Int2,
        rejected_reason -> Nullable<Text>,
        resolved_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    approval_votes (id) {
        id -> Uuid,
        request_id -> Uuid,
        approver_id -> Uuid,
        approver_role -> Int2,
        approved -> Bool,
        reason -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    sows (id) {
        id -> Uuid,
        pricing_plan_id -> Uuid,
        lead_id -> Uuid,
        items -> Jsonb,
        current_version -> Int4,
        is_frozen -> Bool,
        frozen_at -> Nullable<Timestamptz>,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sow_versions (id) {
        id -> Uuid,
        sow_id -> Uuid,
        version -> Int4,
        changed_by -> Uuid,
        changed_at -> Timestamptz,
        change_type -> Int2,
        items_snapshot -> Jsonb,
    }
}

diesel::table! {
    quotations (id) {
        id -> Uuid,
        quotation_number -> Varchar,
        pricing_plan_id -> Uuid,
        lead_id -> Uuid,
        subtotal -> Numeric,
        discount_amount -> Numeric,
        gst_amount -> Numeric,
        grand_total -> Numeric,
        is_final -> Bool,
        finalized_at -> Nullable<Timestamptz>,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    agreements (id) {
        id -> Uuid,
        quotation_id -> Uuid,
        lead_id -> Uuid,
        status -> Int2,
        signed_at -> Nullable<Timestamptz>,
        meeting_frequency -> Nullable<Text>,
        project_tenure_months -> Nullable<Int4>,
        team_deployment -> Jsonb,
        sow_handover_triggered -> Bool,
        created_by -> Uuid,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    agreement_payments (id) {
        id -> Uuid,
        agreement_id -> Uuid,
        installment_number -> Int4,
        amount -> Numeric,
        paid_at -> Timestamptz,
        mode -> Int2,
        utr_number -> Nullable<Text>,
        cheque_number -> Nullable<Text>,
        transaction_id -> Nullable<Text>,
        recorded_by -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    payment_verifications (id) {
        id -> Uuid,
        agreement_id -> Uuid,
        installment_number -> Int4,
        expected_amount -> Numeric,
        received_amount -> Numeric,
        payment_mode -> Int2,
        utr_number -> Nullable<Text>,
        cheque_number -> Nullable<Text>,
        transaction_id -> Nullable<Text>,
        notes -> Nullable<Text>,
        verified_by -> Uuid,
        verified_at -> Timestamptz,
    }
}

diesel::table! {
    kickoff_requests (id) {
        id -> Uuid,
        request_number -> Varchar,
        agreement_id -> Uuid,
        lead_id -> Nullable<Uuid>,
        project_id -> Nullable<Uuid>,
        status -> Int2,
        return_reason -> Nullable<Text>,
        rejected_reason -> Nullable<Text>,
        meeting_frequency -> Nullable<Text>,
        project_tenure_months -> Nullable<Int4>,
        team_deployment -> Jsonb,
        project_manager_id -> Nullable<Uuid>,
        requested_by -> Uuid,
        reviewed_by -> Nullable<Uuid>,
        resolved_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    projects (id) {
        id -> Uuid,
        name -> Text,
        agreement_id -> Uuid,
        kickoff_request_id -> Uuid,
        lead_id -> Nullable<Uuid>,
        sow_id -> Nullable<Uuid>,
        sow_items -> Jsonb,
        team_deployment -> Jsonb,
        project_manager_id -> Nullable<Uuid>,
        contract_value -> Nullable<Numeric>,
        tenure_months -> Nullable<Int4>,
        meeting_frequency -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    notifications (id) {
        id -> Uuid,
        user_id -> Uuid,
        kind -> Text,
        title -> Text,
        message -> Text,
        reference_id -> Nullable<Uuid>,
        priority -> Int4,
        is_read -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    users,
    leads,
    lead_stage_history,
    meetings,
    pricing_plans,
    approval_requests,
    approval_votes,
    sows,
    sow_versions,
    quotations,
    agreements,
    agreement_payments,
    payment_verifications,
    kickoff_requests,
    projects,
    notifications,
);
