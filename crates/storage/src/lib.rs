pub mod db;

pub use db::{
    apply_transfer_pair, assign_category, bulk_assign_category, complete_import_batch,
    count_audit_entries, create_db, create_import_batch, fail_import_batch, get_categories,
    get_confirmed_transactions, get_dedupe_hashes, get_import_batch, get_transaction,
    get_unpaired_since, insert_audit_entry, insert_category, insert_transaction, move_category,
    DbPool, StoreError,
};
