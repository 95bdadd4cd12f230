diesel::table! {
    companies (id) {
        id -> Uuid,
        company_name -> Varchar,
        business_number -> Nullable<Varchar>,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        company_id -> Nullable<Uuid>,
        email -> Varchar,
        name -> Varchar,
        role -> Varchar,
        phone_number -> Nullable<Varchar>,
        position -> Nullable<Varchar>,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    vendors (id) {
        id -> Uuid,
        name -> Varchar,
        aliases -> Jsonb,
        business_number -> Nullable<Varchar>,
        contact_person -> Nullable<Varchar>,
        email -> Nullable<Varchar>,
        phone -> Nullable<Varchar>,
        address -> Nullable<Varchar>,
        vendor_type -> Varchar,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    projects (id) {
        id -> Uuid,
        project_name -> Varchar,
        project_code -> Varchar,
        client_name -> Nullable<Varchar>,
        location -> Nullable<Varchar>,
        status -> Varchar,
        total_budget -> Nullable<Numeric>,
        project_manager_id -> Nullable<Uuid>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    item_categories (id) {
        id -> Uuid,
        category_type -> Varchar,
        category_name -> Varchar,
        parent_id -> Nullable<Uuid>,
        display_order -> Int4,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    items (id) {
        id -> Uuid,
        name -> Varchar,
        specification -> Nullable<Varchar>,
        unit -> Varchar,
        unit_price -> Numeric,
        major_category -> Nullable<Varchar>,
        middle_category -> Nullable<Varchar>,
        minor_category -> Nullable<Varchar>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    approval_workflow_templates (id) {
        id -> Uuid,
        company_id -> Nullable<Uuid>,
        name -> Varchar,
        description -> Nullable<Varchar>,
        is_active -> Bool,
        is_default -> Bool,
        min_amount -> Nullable<Numeric>,
        max_amount -> Nullable<Numeric>,
        category_filter -> Jsonb,
        steps -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    purchase_orders (id) {
        id -> Uuid,
        order_number -> Varchar,
        project_id -> Uuid,
        vendor_id -> Uuid,
        user_id -> Uuid,
        template_id -> Nullable<Uuid>,
        order_date -> Date,
        delivery_date -> Nullable<Date>,
        status -> Varchar,
        order_status -> Varchar,
        approval_status -> Varchar,
        total_amount -> Numeric,
        notes -> Nullable<Text>,
        approval_bypass_reason -> Nullable<Varchar>,
        current_approver_role -> Nullable<Varchar>,
        approved_by -> Nullable<Uuid>,
        approved_at -> Nullable<Timestamptz>,
        sent_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    purchase_order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        item_id -> Nullable<Uuid>,
        item_name -> Varchar,
        specification -> Nullable<Varchar>,
        unit -> Nullable<Varchar>,
        quantity -> Numeric,
        unit_price -> Numeric,
        total_amount -> Numeric,
        major_category -> Nullable<Varchar>,
        middle_category -> Nullable<Varchar>,
        minor_category -> Nullable<Varchar>,
        notes -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    order_history (id) {
        id -> Uuid,
        order_id -> Uuid,
        user_id -> Nullable<Uuid>,
        action -> Varchar,
        changes -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    approval_authorities (id) {
        id -> Uuid,
        role -> Varchar,
        max_amount -> Numeric,
        can_direct_approve -> Bool,
        direct_approve_limit -> Nullable<Numeric>,
        description -> Nullable<Varchar>,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    approval_workflow_settings (id) {
        id -> Uuid,
        company_id -> Uuid,
        approval_mode -> Varchar,
        direct_approval_roles -> Jsonb,
        require_all_stages -> Bool,
        skip_lower_stages -> Bool,
        is_active -> Bool,
        updated_by -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    approval_step_instances (id) {
        id -> Uuid,
        order_id -> Uuid,
        template_id -> Nullable<Uuid>,
        step_order -> Int4,
        required_role -> Varchar,
        status -> Varchar,
        approved_by -> Nullable<Uuid>,
        approved_at -> Nullable<Timestamptz>,
        rejection_reason -> Nullable<Text>,
        comments -> Nullable<Text>,
        skip_reason -> Nullable<Varchar>,
        auto_approve_at -> Nullable<Timestamptz>,
        notify_on_pending -> Bool,
        notify_on_approved -> Bool,
        notify_on_rejected -> Bool,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    email_sending_history (id) {
        id -> Uuid,
        order_id -> Uuid,
        order_number -> Varchar,
        sender_user_id -> Uuid,
        recipients -> Jsonb,
        cc -> Jsonb,
        subject -> Varchar,
        message_content -> Nullable<Text>,
        attachment_files -> Jsonb,
        sending_status -> Varchar,
        sent_count -> Int4,
        failed_count -> Int4,
        error_message -> Nullable<Text>,
        sent_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    email_sending_details (id) {
        id -> Uuid,
        history_id -> Uuid,
        recipient_email -> Varchar,
        recipient_type -> Varchar,
        sending_status -> Varchar,
        error_message -> Nullable<Text>,
        sent_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    invoices (id) {
        id -> Uuid,
        order_id -> Uuid,
        invoice_number -> Varchar,
        invoice_type -> Varchar,
        issue_date -> Date,
        total_amount -> Numeric,
        vat_amount -> Numeric,
        status -> Varchar,
        file_path -> Nullable<Varchar>,
        uploaded_by -> Uuid,
        verified_by -> Nullable<Uuid>,
        verified_at -> Nullable<Timestamptz>,
        notes -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    item_receipts (id) {
        id -> Uuid,
        order_item_id -> Uuid,
        invoice_id -> Nullable<Uuid>,
        received_quantity -> Numeric,
        received_date -> Date,
        quality_check -> Bool,
        quality_notes -> Nullable<Text>,
        verified_by -> Uuid,
        status -> Varchar,
        notes -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    verification_logs (id) {
        id -> Uuid,
        order_id -> Uuid,
        invoice_id -> Nullable<Uuid>,
        item_receipt_id -> Nullable<Uuid>,
        action -> Varchar,
        details -> Nullable<Text>,
        performed_by -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Nullable<Bool>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(purchase_orders -> projects (project_id));
diesel::joinable!(purchase_orders -> vendors (vendor_id));
diesel::joinable!(purchase_orders -> users (user_id));
diesel::joinable!(purchase_order_items -> purchase_orders (order_id));
diesel::joinable!(order_history -> purchase_orders (order_id));
diesel::joinable!(approval_step_instances -> purchase_orders (order_id));
diesel::joinable!(email_sending_history -> purchase_orders (order_id));
diesel::joinable!(email_sending_details -> email_sending_history (history_id));
diesel::joinable!(invoices -> purchase_orders (order_id));
diesel::joinable!(item_receipts -> purchase_order_items (order_item_id));
diesel::joinable!(verification_logs -> purchase_orders (order_id));
diesel::joinable!(verification_logs -> users (performed_by));

diesel::allow_tables_to_appear_in_same_query!(
    companies,
    users,
    vendors,
    projects,
    item_categories,
    items,
    approval_workflow_templates,
    purchase_orders,
    purchase_order_items,
    order_history,
    approval_authorities,
    approval_workflow_settings,
    approval_step_instances,
    email_sending_history,
    email_sending_details,
    invoices,
    item_receipts,
    verification_logs,
    outbox_events,
);
