use bson::{doc, oid::ObjectId, Document};
use futures::TryStreamExt;
use mongodb::{Collection, Database};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaoError {
    #[error("not found")]
    NotFound,
    #[error("duplicate key")]
    DuplicateKey,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
    #[error("bson serialization failed: {0}")]
    BsonSer(#[from] bson::ser::Error),
    #[error("bson deserialization failed: {0}")]
    BsonDe(#[from] bson::de::Error),
}

impl DaoError {
    /// Classifies a raw Mongo error as a duplicate-key violation so
    /// callers can turn it into a 409 rather than a 500.
    pub fn from_mongo(err: mongodb::error::Error) -> Self {
        if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we)) = *err.kind {
            if we.code == 11000 {
                return DaoError::DuplicateKey;
            }
        }
        DaoError::Mongo(err)
    }
}

pub type DaoResult<T> = Result<T, DaoError>;

#[derive(Debug, Clone, Copy)]
pub struct PaginationParams {
    pub page: u64,
    pub page_size: u64,
}

impl PaginationParams {
    pub fn new(page: u64, page_size: u64) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, 200),
        }
    }

    fn skip(&self) -> u64 {
        (self.page - 1) * self.page_size
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
}

/// Thin wrapper over a typed Mongo collection giving every DAO the
/// same CRUD vocabulary, following the composition-over-inheritance
/// shape the room/user DAOs already build on (`base: BaseDao<T>`).
#[derive(Clone)]
pub struct BaseDao<T> {
    collection: Collection<T>,
}

impl<T> BaseDao<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    pub fn new(db: &Database, collection_name: &str) -> Self {
        Self {
            collection: db.collection(collection_name),
        }
    }

    pub fn collection(&self) -> &Collection<T> {
        &self.collection
    }

    pub async fn insert(&self, doc: &T) -> DaoResult<ObjectId> {
        let result = self
            .collection
            .insert_one(doc)
            .await
            .map_err(DaoError::from_mongo)?;
        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| DaoError::Validation("insert did not return an ObjectId".into()))
    }

    pub async fn find_by_id(&self, id: &ObjectId) -> DaoResult<T> {
        self.collection
            .find_one(doc! { "_id": id })
            .await?
            .ok_or(DaoError::NotFound)
    }

    pub async fn find_one(&self, filter: Document) -> DaoResult<Option<T>> {
        Ok(self.collection.find_one(filter).await?)
    }

    pub async fn find_many(&self, filter: Document) -> DaoResult<Vec<T>> {
        let cursor = self.collection.find(filter).await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn update_one(&self, filter: Document, update: Document) -> DaoResult<()> {
        let result = self.collection.update_one(filter, update).await?;
        if result.matched_count == 0 {
            return Err(DaoError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_one(&self, filter: Document) -> DaoResult<()> {
        let result = self.collection.delete_one(filter).await?;
        if result.deleted_count == 0 {
            return Err(DaoError::NotFound);
        }
        Ok(())
    }

    pub async fn count(&self, filter: Document) -> DaoResult<u64> {
        Ok(self.collection.count_documents(filter).await?)
    }

    pub async fn paginate(
        &self,
        filter: Document,
        sort: Document,
        params: PaginationParams,
    ) -> DaoResult<PaginatedResult<T>> {
        let total = self.count(filter.clone()).await?;
        let cursor = self
            .collection
            .find(filter)
            .sort(sort)
            .skip(params.skip())
            .limit(params.page_size as i64)
            .await?;
        let items = cursor.try_collect().await?;
        Ok(PaginatedResult {
            items,
            total,
            page: params.page,
            page_size: params.page_size,
        })
    }
}
