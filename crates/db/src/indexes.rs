use mongodb::{options::IndexOptions, Database, IndexModel};
use tracing::info;

use crate::models::{MeetingSession, RoomPolicy, Subtitle, User};

pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    create_indexes(
        db,
        User::COLLECTION,
        vec![index_unique(bson::doc! { "email": 1 })],
    )
    .await?;

    create_indexes(
        db,
        RoomPolicy::COLLECTION,
        vec![index_unique(bson::doc! { "room_id": 1 })],
    )
    .await?;

    // At most one active session per room: a partial unique index lets
    // many closed (`is_active: false`) sessions coexist for history
    // while the database itself rejects a second concurrent open one,
    // backstopping the room actor's in-process serialization.
    create_indexes(
        db,
        MeetingSession::COLLECTION,
        vec![
            index_unique_partial_active(bson::doc! { "room_id": 1 }),
            index(bson::doc! { "room_id": 1, "opened_at": -1 }),
        ],
    )
    .await?;

    create_indexes(
        db,
        Subtitle::COLLECTION,
        vec![
            index_unique(bson::doc! { "subtitle_id": 1 }),
            index(bson::doc! { "room_id": 1, "seq": 1 }),
            index(bson::doc! { "session_id": 1, "seq": 1 }),
        ],
    )
    .await?;

    info!("All indexes ensured");
    Ok(())
}

fn index(keys: bson::Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

fn index_unique(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn index_unique_partial_active(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .unique(true)
                .partial_filter_expression(bson::doc! { "is_active": true })
                .build(),
        )
        .build()
}

async fn create_indexes(
    db: &Database,
    collection: &str,
    indexes: Vec<IndexModel>,
) -> Result<(), mongodb::error::Error> {
    let coll = db.collection::<bson::Document>(collection);
    match coll.create_indexes(indexes.clone()).await {
        Ok(_) => {
            info!(collection, "Indexes created");
            Ok(())
        }
        Err(e) => {
            // IndexKeySpecsConflict (code 86): an existing index has the same
            // name but different options. Drop and recreate.
            if let mongodb::error::ErrorKind::Command(ref cmd_err) = *e.kind {
                if cmd_err.code == 86 {
                    tracing::warn!(
                        collection,
                        "Index conflict detected, dropping conflicting indexes and retrying"
                    );
                    coll.drop_indexes().await?;
                    coll.create_indexes(indexes).await?;
                    info!(collection, "Indexes recreated after conflict resolution");
                    return Ok(());
                }
            }
            Err(e)
        }
    }
}
