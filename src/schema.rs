// Kept in sync by hand with `cache::CREATE_TABLES`.

diesel::table! {
    cache_entries (key) {
        key -> Text,
        query -> Text,
        value -> Text,
        created_at -> BigInt,
        last_accessed -> BigInt,
    }
}

diesel::table! {
    cache_stats (id) {
        id -> Integer,
        hits -> BigInt,
        misses -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(cache_entries, cache_stats,);
