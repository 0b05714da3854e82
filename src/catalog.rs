use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::*;
use crate::model::Room;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("room catalog unavailable: {0}")]
    Unavailable(String),
    #[error("invalid room {id}: {reason}")]
    InvalidRoom { id: Ulid, reason: &'static str },
    #[error("room catalog full")]
    Full,
    #[error("catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalog file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where the booking engine looks up rooms. Listing CRUD lives behind this seam.
#[async_trait]
pub trait RoomCatalog: Send + Sync {
    async fn room(&self, id: Ulid) -> Result<Option<Room>, CatalogError>;

    /// Ids of every room the owner currently holds.
    async fn rooms_owned_by(&self, owner_id: Ulid) -> Result<Vec<Ulid>, CatalogError>;
}

#[derive(Default)]
pub struct InMemoryCatalog {
    rooms: DashMap<Ulid, Room>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of rooms.
    pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
        let bytes = std::fs::read(path)?;
        let rooms: Vec<Room> = serde_json::from_slice(&bytes)?;
        let catalog = Self::new();
        for room in rooms {
            catalog.upsert(room)?;
        }
        Ok(catalog)
    }

    /// Insert or replace a room. The owner of an existing room cannot change.
    pub fn upsert(&self, room: Room) -> Result<(), CatalogError> {
        room.validate()
            .map_err(|reason| CatalogError::InvalidRoom { id: room.id, reason })?;
        if let Some(name) = &room.name
            && name.len() > MAX_ROOM_NAME_LEN
        {
            return Err(CatalogError::InvalidRoom { id: room.id, reason: "name too long" });
        }
        if let Some(existing) = self.rooms.get(&room.id) {
            if existing.owner_id != room.owner_id {
                return Err(CatalogError::InvalidRoom {
                    id: room.id,
                    reason: "ownership transfer is not supported",
                });
            }
        } else if self.rooms.len() >= MAX_CATALOG_ROOMS {
            return Err(CatalogError::Full);
        }
        self.rooms.insert(room.id, room);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[async_trait]
impl RoomCatalog for InMemoryCatalog {
    async fn room(&self, id: Ulid) -> Result<Option<Room>, CatalogError> {
        Ok(self.rooms.get(&id).map(|e| e.value().clone()))
    }

    async fn rooms_owned_by(&self, owner_id: Ulid) -> Result<Vec<Ulid>, CatalogError> {
        Ok(self
            .rooms
            .iter()
            .filter(|e| e.value().owner_id == owner_id)
            .map(|e| *e.key())
            .collect())
    }
}
