//! Diesel table definitions for the PostgreSQL schema.
//!
//! Maintained manually so the persistence adapter stays compile-safe while
//! migrations evolve. Note timestamps (`created_at`, `updated_at`,
//! `due_date`, `deleted_at`) are millisecond epochs in the client clock
//! domain and therefore `Int8`; server-side rows use `Timestamptz`.
//! `users.external_id` and `note_changes (user_id, request_id)` carry unique
//! constraints in the migrations.

diesel::table! {
    users (id) {
        id -> Uuid,
        external_id -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    devices (id, user_id) {
        id -> Uuid,
        user_id -> Uuid,
        label -> Text,
        platform -> Text,
        last_seen_at -> Timestamptz,
        created_at -> Timestamptz,
        revoked_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    notes (user_id, id) {
        user_id -> Uuid,
        id -> Text,
        content -> Text,
        title -> Nullable<Text>,
        tags -> Array<Text>,
        note_type -> Text,
        is_processed -> Bool,
        is_completed -> Bool,
        is_archived -> Bool,
        is_pinned -> Bool,
        due_date -> Nullable<Int8>,
        priority -> Nullable<Text>,
        analysis_state -> Nullable<Text>,
        analysis_version -> Nullable<Int8>,
        content_hash -> Nullable<Text>,
        created_at -> Int8,
        updated_at -> Int8,
        version -> Int8,
        deleted_at -> Nullable<Int8>,
        last_modified_by_device_id -> Nullable<Text>,
    }
}

diesel::table! {
    note_changes (seq) {
        seq -> Int8,
        user_id -> Uuid,
        note_id -> Text,
        op -> Text,
        payload -> Jsonb,
        base_version -> Int8,
        new_version -> Int8,
        request_id -> Text,
        device_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    idempotency_keys (user_id, request_id) {
        user_id -> Uuid,
        request_id -> Text,
        response -> Jsonb,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    sync_bootstrap (user_id) {
        user_id -> Uuid,
        imported_count -> Int8,
        source_fingerprint -> Text,
        cursor_after_import -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ai_provider_keys (user_id) {
        user_id -> Uuid,
        ciphertext -> Bytea,
        key_version -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(devices -> users (user_id));
diesel::joinable!(sync_bootstrap -> users (user_id));
diesel::joinable!(ai_provider_keys -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    ai_provider_keys,
    devices,
    idempotency_keys,
    note_changes,
    notes,
    sync_bootstrap,
    users,
);
