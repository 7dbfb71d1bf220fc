//! Part scheduling.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use bytelift_protocol::{BeginMultipartUploadRequest, FileDetails, UploadPart};

use crate::api::UploadApi;
use crate::error::UploadError;

/// What the begin-upload call told us about the session.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSessionMetadata {
    pub upload_id: String,
    pub file: FileDetails,
    pub part_count: u32,
}

/// Hands out part indices in increasing order and resolves them to parts.
///
/// Part 0 comes from the begin-upload response; every other part is
/// fetched on demand. Safe to share between concurrently running workers.
#[derive(Debug)]
pub struct PartScheduler {
    upload_id: String,
    part_count: u32,
    cursor: AtomicU32,
    first: Mutex<Option<UploadPart>>,
}

impl PartScheduler {
    /// Opens a session and builds a scheduler over its parts.
    pub async fn begin_session(
        api: &dyn UploadApi,
        request: &BeginMultipartUploadRequest,
    ) -> Result<(UploadSessionMetadata, Self), UploadError> {
        let response = api.begin_multipart_upload(request).await?;
        let parts = response.upload_parts;

        if parts.count == 0 {
            return Err(UploadError::Protocol(
                "begin-upload response declared zero parts".into(),
            ));
        }
        if parts.first.upload_part_index != 0 {
            return Err(UploadError::Protocol(format!(
                "begin-upload response inlined part {} instead of part 0",
                parts.first.upload_part_index
            )));
        }
        check_range(&parts.first)?;

        let metadata = UploadSessionMetadata {
            upload_id: response.upload_id.clone(),
            file: response.file,
            part_count: parts.count,
        };
        let scheduler = Self {
            upload_id: response.upload_id,
            part_count: parts.count,
            cursor: AtomicU32::new(0),
            first: Mutex::new(Some(parts.first)),
        };
        Ok((metadata, scheduler))
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    /// Claims the next part index, or `None` once every index has been issued.
    pub fn next_part_index(&self) -> Option<u32> {
        self.cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| {
                (i < self.part_count).then_some(i + 1)
            })
            .ok()
    }

    /// Resolves a claimed index to its part descriptor.
    pub async fn get_part(
        &self,
        api: &dyn UploadApi,
        index: u32,
    ) -> Result<UploadPart, UploadError> {
        if index == 0 {
            let first = self
                .first
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(part) = first {
                return Ok(part);
            }
        }

        let part = api.get_upload_part(&self.upload_id, index).await?;
        if part.upload_part_index != index {
            return Err(UploadError::Protocol(format!(
                "requested part {index} but received part {}",
                part.upload_part_index
            )));
        }
        check_range(&part)?;
        Ok(part)
    }
}

fn check_range(part: &UploadPart) -> Result<(), UploadError> {
    if part.range.is_well_formed() {
        return Ok(());
    }
    Err(UploadError::Protocol(format!(
        "part {} has malformed range {}..={}",
        part.upload_part_index, part.range.inclusive_start, part.range.inclusive_end
    )))
}
