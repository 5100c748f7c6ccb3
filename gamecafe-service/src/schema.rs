diesel::table! {
    consoles (id) {
        id -> Uuid,
        name -> Varchar,
        hourly_rate -> Numeric,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    bookings (id) {
        id -> Uuid,
        console_id -> Uuid,
        user_id -> Uuid,
        start_time -> Timestamptz,
        end_time -> Timestamptz,
        duration_hours -> Int4,
        amount -> Numeric,
        contact_name -> Varchar,
        contact_phone -> Varchar,
        contact_email -> Varchar,
        notes -> Nullable<Text>,
        status -> Varchar,
        created_at -> Timestamptz,
        confirmed_at -> Nullable<Timestamptz>,
        cancelled_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    payments (id) {
        id -> Uuid,
        booking_id -> Nullable<Uuid>,
        order_id -> Nullable<Uuid>,
        user_id -> Uuid,
        amount -> Numeric,
        currency -> Varchar,
        phone_number -> Varchar,
        external_reference -> Nullable<Varchar>,
        provider_txn_id -> Nullable<Varchar>,
        status -> Varchar,
        failed_attempts -> Int4,
        error_message -> Nullable<Text>,
        created_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        price -> Numeric,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    game_keys (id) {
        id -> Uuid,
        product_id -> Uuid,
        key_code -> Varchar,
        is_used -> Bool,
        used_at -> Nullable<Timestamptz>,
        used_by -> Nullable<Uuid>,
        order_line_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        user_id -> Uuid,
        amount -> Numeric,
        status -> Varchar,
        fulfillment_error -> Nullable<Text>,
        created_at -> Timestamptz,
        paid_at -> Nullable<Timestamptz>,
        completed_at -> Nullable<Timestamptz>,
        cancelled_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    order_lines (id) {
        id -> Uuid,
        order_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        unit_price -> Numeric,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    consoles,
    bookings,
    payments,
    products,
    game_keys,
    orders,
    order_lines,
);
