use diesel::{allow_tables_to_appear_in_same_query, table};

table! {
    notifications (id) {
        id -> BigInt,
        recipient -> Text,
        kind -> Text,
        title -> Text,
        body -> Text,
        link -> Nullable<Text>,
        read -> Bool,
        read_at -> Nullable<Timestamptz>,
        causer_id -> Nullable<Text>,
        resource_id -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

table! {
    presence_samples (id) {
        id -> BigInt,
        recipient -> Text,
        seen_at -> Timestamptz,
    }
}

table! {
    activity_estimates (id) {
        id -> BigInt,
        recipient -> Text,
        kind -> Text,
        send_minute -> Integer,
        updated_at -> Timestamptz,
    }
}

table! {
    delivery_log (id) {
        id -> BigInt,
        recipient -> Text,
        kind -> Text,
        delivered_at -> Timestamptz,
    }
}

table! {
    web_push_subscriptions (id) {
        id -> BigInt,
        recipient -> Text,
        endpoint -> Text,
        p256dh -> Text,
        auth -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    device_tokens (id) {
        id -> BigInt,
        recipient -> Text,
        token -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    permission_grants (id) {
        id -> BigInt,
        recipient -> Text,
        kind -> Text,
        channel -> Text,
        token -> Text,
        created_at -> Timestamptz,
    }
}

allow_tables_to_appear_in_same_query!(
    notifications,
    presence_samples,
    activity_estimates,
    delivery_log,
    web_push_subscriptions,
    device_tokens,
    permission_grants,
);
