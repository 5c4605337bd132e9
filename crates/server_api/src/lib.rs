use shared::{
    domain::{Item, ItemId},
    error::{ApiError, ErrorCode},
    protocol::{ItemChanges, NewItem},
};
use storage::Storage;
use tracing::error;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn list_items(ctx: &ApiContext) -> Result<Vec<Item>, ApiError> {
    ctx.storage.list_items().await.map_err(internal)
}

pub async fn create_item(ctx: &ApiContext, new_item: NewItem) -> Result<Item, ApiError> {
    new_item.validate()?;
    ctx.storage.create_item(&new_item).await.map_err(internal)
}

pub async fn update_item(
    ctx: &ApiContext,
    item_id: &ItemId,
    changes: ItemChanges,
) -> Result<Item, ApiError> {
    changes.validate()?;
    let key = storage_key(item_id)?;
    ctx.storage
        .update_item(key, &changes)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(item_id))
}

pub async fn delete_item(ctx: &ApiContext, item_id: &ItemId) -> Result<(), ApiError> {
    let key = storage_key(item_id)?;
    let removed = ctx.storage.delete_item(key).await.map_err(internal)?;
    if !removed {
        return Err(not_found(item_id));
    }
    Ok(())
}

/// Only decimal ids are ever issued, so anything else is unknown rather than malformed.
fn storage_key(item_id: &ItemId) -> Result<i64, ApiError> {
    item_id
        .as_str()
        .parse::<i64>()
        .map_err(|_| not_found(item_id))
}

fn not_found(item_id: &ItemId) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("item {item_id} not found"))
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %err, "item storage failure");
    ApiError::new(ErrorCode::Internal, err.to_string())
}
