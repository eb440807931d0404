//-
// Copyright (c) 2026, The Mallard Authors
//
// This file is part of Mallard.
//
// Mallard is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mallard is distributed  in the hope that it  will be useful,  but WITHOUT
// ANY  WARRANTY;  without  even  the implied  warranty of  MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Mallard. If not, see <http://www.gnu.org/licenses/>.

//! The attachment blob store collaborator.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// Metadata the indexer attaches to every stored blob.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Messages referencing this blob.
    pub messages: Vec<String>,
    pub filename: String,
    pub content_type: String,
    pub disposition: String,
    pub transfer_encoding: String,
}

pub trait BlobStore: Send + Sync {
    fn put(
        &self,
        id: &str,
        data: &[u8],
        metadata: BlobMetadata,
    ) -> Result<(), Error>;

    fn get(&self, id: &str) -> Result<Vec<u8>, Error>;

    fn delete(&self, id: &str) -> Result<(), Error>;
}

/// In-memory blob store used by tests and the demo server.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (Vec<u8>, BlobMetadata)>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metadata(&self, id: &str) -> Result<BlobMetadata, Error> {
        self.blobs
            .lock()
            .unwrap()
            .get(id)
            .map(|(_, meta)| meta.clone())
            .ok_or(Error::NxBlob)
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(
        &self,
        id: &str,
        data: &[u8],
        metadata: BlobMetadata,
    ) -> Result<(), Error> {
        self.blobs
            .lock()
            .unwrap()
            .insert(id.to_owned(), (data.to_vec(), metadata));
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Vec<u8>, Error> {
        self.blobs
            .lock()
            .unwrap()
            .get(id)
            .map(|(data, _)| data.clone())
            .ok_or(Error::NxBlob)
    }

    fn delete(&self, id: &str) -> Result<(), Error> {
        self.blobs
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or(Error::NxBlob)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn put_get_delete() {
        let blobs = MemoryBlobStore::new();
        blobs
            .put(
                "abc",
                b"data",
                BlobMetadata {
                    filename: "f.bin".to_owned(),
                    ..BlobMetadata::default()
                },
            )
            .unwrap();

        assert_eq!(b"data".to_vec(), blobs.get("abc").unwrap());
        assert_eq!("f.bin", blobs.metadata("abc").unwrap().filename);
        blobs.delete("abc").unwrap();
        assert_matches!(Err(Error::NxBlob), blobs.get("abc"));
    }
}
