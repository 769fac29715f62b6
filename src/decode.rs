//! One forward decode pass over an OSM PBF source.
//!
//! The pass drives a [`Sink`] through the four-call lifecycle contract:
//! `initialize` once (with the source header's metadata when present), then
//! `process` once per entity in source order, then `complete`, then `close`.
//!
//! Blob decoding is the expensive part of a pass, so blobs are dealt
//! round-robin to a small worker pool and collected round-robin again, which
//! parallelises decompression while preserving source order exactly.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread;

use osmpbf::{Blob, BlobDecode, BlobReader, Element, HeaderBlock, RelMemberType};
use thiserror::Error;

use crate::entity::{Entity, EntityKind, Member, Metadata, Payload, Tags};
use crate::sink::{Sink, SinkError};

/// Blobs buffered per worker channel.
const BLOB_QUEUE_DEPTH: usize = 4;

/// Header metadata handed to sinks at `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMetadata {
    /// Features a reader must understand to decode the source.
    pub required_features: Vec<String>,
    /// Features the source advertises but does not require.
    pub optional_features: Vec<String>,
}

impl From<&HeaderBlock> for SourceMetadata {
    fn from(header: &HeaderBlock) -> Self {
        Self {
            required_features: header
                .required_features()
                .iter()
                .map(ToString::to_string)
                .collect(),
            optional_features: header
                .optional_features()
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Errors raised while running a decode pass.
#[derive(Debug, Error)]
pub enum PassError {
    /// The source file could not be opened.
    #[error("failed to open OSM PBF file at {path:?}")]
    Open {
        /// Underlying decoder failure.
        #[source]
        source: osmpbf::Error,
        /// Source that could not be opened.
        path: PathBuf,
    },
    /// The source data could not be read or decoded.
    #[error("failed to decode OSM PBF data at {path:?}")]
    Decode {
        /// Underlying decoder failure.
        #[source]
        source: osmpbf::Error,
        /// Source that could not be decoded.
        path: PathBuf,
    },
    /// The sink rejected a lifecycle call or failed to persist an entity.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

enum Decoded {
    Header(SourceMetadata),
    Entities(Vec<Entity>),
}

/// Runs one full decode pass over `path`, driving `sink` to completion.
///
/// `threads` sizes the blob-decoding worker pool; order of delivery always
/// matches source order regardless of the pool size. The pass stops at the
/// first sink or decoder error; the sink is not completed in that case.
pub fn run_pass<S: Sink>(path: &Path, threads: usize, sink: &mut S) -> Result<(), PassError> {
    let reader = BlobReader::from_path(path).map_err(|source| PassError::Open {
        source,
        path: path.to_path_buf(),
    })?;
    let workers = threads.max(1);

    thread::scope(|scope| -> Result<(), PassError> {
        let mut blob_senders = Vec::with_capacity(workers);
        let mut decoded_receivers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (blob_sender, blob_receiver) = sync_channel(BLOB_QUEUE_DEPTH);
            let (decoded_sender, decoded_receiver) = sync_channel(BLOB_QUEUE_DEPTH);
            scope.spawn(move || decode_worker(&blob_receiver, &decoded_sender));
            blob_senders.push(blob_sender);
            decoded_receivers.push(decoded_receiver);
        }
        scope.spawn(move || dispatch_blobs(reader, &blob_senders));

        let mut open: Vec<bool> = vec![true; workers];
        let mut initialized = false;
        let mut index = 0;
        while open.iter().any(|&flag| flag) {
            if open[index] {
                match decoded_receivers[index].recv() {
                    Ok(Ok(Decoded::Header(metadata))) => {
                        if !initialized {
                            sink.initialize(&metadata)?;
                            initialized = true;
                        }
                    }
                    Ok(Ok(Decoded::Entities(entities))) => {
                        if !initialized {
                            sink.initialize(&SourceMetadata::default())?;
                            initialized = true;
                        }
                        for entity in &entities {
                            sink.process(entity)?;
                        }
                    }
                    Ok(Err(source)) => {
                        return Err(PassError::Decode {
                            source,
                            path: path.to_path_buf(),
                        });
                    }
                    Err(_) => open[index] = false,
                }
            }
            index = (index + 1) % workers;
        }

        // An empty source still opens (and therefore creates) the output.
        if !initialized {
            sink.initialize(&SourceMetadata::default())?;
        }
        sink.complete()?;
        sink.close();
        Ok(())
    })
}

/// Deals blobs round-robin to the worker channels. Stops silently when the
/// collector has hung up after a failure downstream.
fn dispatch_blobs<I>(reader: I, senders: &[SyncSender<Result<Blob, osmpbf::Error>>])
where
    I: Iterator<Item = Result<Blob, osmpbf::Error>>,
{
    for (index, blob) in reader.enumerate() {
        let stop = blob.is_err();
        if senders[index % senders.len()].send(blob).is_err() || stop {
            return;
        }
    }
}

fn decode_worker(
    receiver: &Receiver<Result<Blob, osmpbf::Error>>,
    sender: &SyncSender<Result<Decoded, osmpbf::Error>>,
) {
    while let Ok(item) = receiver.recv() {
        let decoded = item.and_then(decode_blob);
        let failed = decoded.is_err();
        if sender.send(decoded).is_err() || failed {
            return;
        }
    }
}

fn decode_blob(blob: Blob) -> Result<Decoded, osmpbf::Error> {
    match blob.decode()? {
        BlobDecode::OsmHeader(header) => Ok(Decoded::Header(SourceMetadata::from(header.as_ref()))),
        BlobDecode::OsmData(block) => Ok(Decoded::Entities(
            block.elements().map(convert_element).collect(),
        )),
        BlobDecode::Unknown(_) => Ok(Decoded::Entities(Vec::new())),
    }
}

fn convert_element(element: Element<'_>) -> Entity {
    match element {
        Element::Node(node) => Entity {
            id: node.id(),
            tags: collect_tags(node.tags()),
            metadata: metadata_from_info(&node.info()),
            payload: Payload::Node {
                lat: node.lat(),
                lon: node.lon(),
            },
        },
        Element::DenseNode(node) => Entity {
            id: node.id(),
            tags: collect_tags(node.tags()),
            metadata: node.info().map(|info| Metadata {
                version: Some(info.version()),
                timestamp_ms: Some(info.milli_timestamp()),
                changeset: Some(info.changeset()),
                uid: Some(info.uid()),
                user: info.user().ok().map(ToOwned::to_owned),
            }),
            payload: Payload::Node {
                lat: node.lat(),
                lon: node.lon(),
            },
        },
        Element::Way(way) => Entity {
            id: way.id(),
            tags: collect_tags(way.tags()),
            metadata: metadata_from_info(&way.info()),
            payload: Payload::Way {
                refs: way.refs().collect(),
            },
        },
        Element::Relation(relation) => Entity {
            id: relation.id(),
            tags: collect_tags(relation.tags()),
            metadata: metadata_from_info(&relation.info()),
            payload: Payload::Relation {
                members: relation
                    .members()
                    .map(|member| Member {
                        role: member.role().unwrap_or_default().to_owned(),
                        kind: member_kind(member.member_type),
                        member_ref: member.member_id,
                    })
                    .collect(),
            },
        },
    }
}

fn collect_tags<'a, T>(tags: T) -> Tags
where
    T: IntoIterator<Item = (&'a str, &'a str)>,
{
    tags.into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

fn metadata_from_info(info: &osmpbf::Info<'_>) -> Option<Metadata> {
    let metadata = Metadata {
        version: info.version(),
        timestamp_ms: info.milli_timestamp(),
        changeset: info.changeset(),
        uid: info.uid(),
        user: info.user().and_then(Result::ok).map(ToOwned::to_owned),
    };
    (!metadata.is_empty()).then_some(metadata)
}

const fn member_kind(member_type: RelMemberType) -> EntityKind {
    match member_type {
        RelMemberType::Node => EntityKind::Node,
        RelMemberType::Way => EntityKind::Way,
        RelMemberType::Relation => EntityKind::Relation,
    }
}
