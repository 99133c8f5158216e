mod client;

pub use client::{ApiErrorClass, ObjectList, ObjectMeta, ObjectStoreClient, StoreError};
