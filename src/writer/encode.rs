//! Per-kind Arrow schemas and row batch encoders.
//!
//! Each entity kind maps to a fixed schema; the kind is a closed enum, so
//! the encoder is selected by exhaustive matching. Rows are accumulated in
//! Arrow builders and drained into record batches by the parquet writer.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, Float64Builder, Int32Builder, Int64Builder, ListArray, ListBuilder, MapBuilder,
    StringBuilder, StructArray,
};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::entity::{Entity, EntityKind, Metadata, Payload};

use super::WriterError;

/// The Arrow schema used for entities of `kind`.
///
/// Metadata columns are omitted entirely when `exclude_metadata` is set.
#[must_use]
pub fn schema(kind: EntityKind, exclude_metadata: bool) -> SchemaRef {
    let mut fields = match kind {
        EntityKind::Node => vec![
            Field::new("id", DataType::Int64, false),
            Field::new("latitude", DataType::Float64, false),
            Field::new("longitude", DataType::Float64, false),
            tags_field(),
        ],
        EntityKind::Way => vec![
            Field::new("id", DataType::Int64, false),
            Field::new("nodes", node_refs_type(), true),
            tags_field(),
        ],
        EntityKind::Relation => vec![
            Field::new("id", DataType::Int64, false),
            Field::new("members", members_type(), true),
            tags_field(),
        ],
    };
    if !exclude_metadata {
        fields.extend(metadata_fields());
    }
    Arc::new(Schema::new(fields))
}

/// Tags are a map column; the nested field names mirror what the Arrow map
/// builder produces so schema and batches always agree.
fn tags_field() -> Field {
    let entries = Field::new(
        "entries",
        DataType::Struct(Fields::from(vec![
            Field::new("keys", DataType::Utf8, false),
            Field::new("values", DataType::Utf8, true),
        ])),
        false,
    );
    Field::new("tags", DataType::Map(Arc::new(entries), false), true)
}

fn node_refs_type() -> DataType {
    DataType::List(Arc::new(Field::new("item", DataType::Int64, true)))
}

fn member_fields() -> Fields {
    Fields::from(vec![
        Field::new("type", DataType::Utf8, false),
        Field::new("ref", DataType::Int64, false),
        Field::new("role", DataType::Utf8, true),
    ])
}

fn members_type() -> DataType {
    DataType::List(Arc::new(Field::new(
        "item",
        DataType::Struct(member_fields()),
        true,
    )))
}

fn metadata_fields() -> Vec<Field> {
    vec![
        Field::new("version", DataType::Int32, true),
        Field::new("timestamp", DataType::Int64, true),
        Field::new("changeset", DataType::Int64, true),
        Field::new("uid", DataType::Int32, true),
        Field::new("user", DataType::Utf8, true),
    ]
}

type TagsBuilder = MapBuilder<StringBuilder, StringBuilder>;

fn tags_builder() -> TagsBuilder {
    MapBuilder::new(None, StringBuilder::new(), StringBuilder::new())
}

/// Accumulates entity rows of one kind and drains them into record batches.
pub(crate) struct RowBatcher {
    kind: EntityKind,
    schema: SchemaRef,
    columns: KindColumns,
    metadata: Option<MetadataColumns>,
    rows: usize,
}

enum KindColumns {
    Node {
        ids: Int64Builder,
        lats: Float64Builder,
        lons: Float64Builder,
        tags: TagsBuilder,
    },
    Way {
        ids: Int64Builder,
        refs: ListBuilder<Int64Builder>,
        tags: TagsBuilder,
    },
    Relation {
        ids: Int64Builder,
        member_types: StringBuilder,
        member_refs: Int64Builder,
        member_roles: StringBuilder,
        member_lengths: Vec<usize>,
        tags: TagsBuilder,
    },
}

impl RowBatcher {
    pub(crate) fn new(kind: EntityKind, exclude_metadata: bool) -> Self {
        let columns = match kind {
            EntityKind::Node => KindColumns::Node {
                ids: Int64Builder::new(),
                lats: Float64Builder::new(),
                lons: Float64Builder::new(),
                tags: tags_builder(),
            },
            EntityKind::Way => KindColumns::Way {
                ids: Int64Builder::new(),
                refs: ListBuilder::new(Int64Builder::new()),
                tags: tags_builder(),
            },
            EntityKind::Relation => KindColumns::Relation {
                ids: Int64Builder::new(),
                member_types: StringBuilder::new(),
                member_refs: Int64Builder::new(),
                member_roles: StringBuilder::new(),
                member_lengths: Vec::new(),
                tags: tags_builder(),
            },
        };
        Self {
            kind,
            schema: schema(kind, exclude_metadata),
            columns,
            metadata: (!exclude_metadata).then(MetadataColumns::new),
            rows: 0,
        }
    }

    pub(crate) fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    pub(crate) const fn len(&self) -> usize {
        self.rows
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub(crate) fn append(&mut self, entity: &Entity) -> Result<(), WriterError> {
        let kind = self.kind;
        match (&mut self.columns, &entity.payload) {
            (KindColumns::Node { ids, lats, lons, tags }, Payload::Node { lat, lon }) => {
                ids.append_value(entity.id);
                lats.append_value(*lat);
                lons.append_value(*lon);
                append_tags(tags, entity, kind)?;
            }
            (KindColumns::Way { ids, refs, tags }, Payload::Way { refs: node_refs }) => {
                ids.append_value(entity.id);
                for node_ref in node_refs {
                    refs.values().append_value(*node_ref);
                }
                refs.append(true);
                append_tags(tags, entity, kind)?;
            }
            (
                KindColumns::Relation {
                    ids,
                    member_types,
                    member_refs,
                    member_roles,
                    member_lengths,
                    tags,
                },
                Payload::Relation { members },
            ) => {
                ids.append_value(entity.id);
                for member in members {
                    member_types.append_value(member.kind.as_str());
                    member_refs.append_value(member.member_ref);
                    member_roles.append_value(&member.role);
                }
                member_lengths.push(members.len());
                append_tags(tags, entity, kind)?;
            }
            _ => {
                return Err(WriterError::KindMismatch {
                    expected: kind,
                    actual: entity.kind(),
                });
            }
        }
        if let Some(metadata) = &mut self.metadata {
            metadata.append(entity.metadata.as_ref());
        }
        self.rows += 1;
        Ok(())
    }

    /// Drains the buffered rows into a record batch, resetting the builders.
    pub(crate) fn finish(&mut self) -> Result<RecordBatch, WriterError> {
        let kind = self.kind;
        let mut arrays: Vec<ArrayRef> = match &mut self.columns {
            KindColumns::Node { ids, lats, lons, tags } => vec![
                Arc::new(ids.finish()),
                Arc::new(lats.finish()),
                Arc::new(lons.finish()),
                Arc::new(tags.finish()),
            ],
            KindColumns::Way { ids, refs, tags } => vec![
                Arc::new(ids.finish()),
                Arc::new(refs.finish()),
                Arc::new(tags.finish()),
            ],
            KindColumns::Relation {
                ids,
                member_types,
                member_refs,
                member_roles,
                member_lengths,
                tags,
            } => {
                let entries = StructArray::try_new(
                    member_fields(),
                    vec![
                        Arc::new(member_types.finish()),
                        Arc::new(member_refs.finish()),
                        Arc::new(member_roles.finish()),
                    ],
                    None,
                )
                .map_err(|source| WriterError::Encode { source, kind })?;
                let offsets = OffsetBuffer::from_lengths(std::mem::take(member_lengths));
                let members = ListArray::try_new(
                    Arc::new(Field::new("item", DataType::Struct(member_fields()), true)),
                    offsets,
                    Arc::new(entries),
                    None,
                )
                .map_err(|source| WriterError::Encode { source, kind })?;
                vec![
                    Arc::new(ids.finish()),
                    Arc::new(members),
                    Arc::new(tags.finish()),
                ]
            }
        };
        if let Some(metadata) = &mut self.metadata {
            metadata.finish_into(&mut arrays);
        }
        self.rows = 0;
        RecordBatch::try_new(Arc::clone(&self.schema), arrays)
            .map_err(|source| WriterError::Encode { source, kind })
    }
}

fn append_tags(
    builder: &mut TagsBuilder,
    entity: &Entity,
    kind: EntityKind,
) -> Result<(), WriterError> {
    for (key, value) in &entity.tags {
        builder.keys().append_value(key);
        builder.values().append_value(value);
    }
    builder
        .append(true)
        .map_err(|source| WriterError::Encode { source, kind })
}

struct MetadataColumns {
    versions: Int32Builder,
    timestamps: Int64Builder,
    changesets: Int64Builder,
    uids: Int32Builder,
    users: StringBuilder,
}

impl MetadataColumns {
    fn new() -> Self {
        Self {
            versions: Int32Builder::new(),
            timestamps: Int64Builder::new(),
            changesets: Int64Builder::new(),
            uids: Int32Builder::new(),
            users: StringBuilder::new(),
        }
    }

    fn append(&mut self, metadata: Option<&Metadata>) {
        match metadata {
            Some(block) => {
                self.versions.append_option(block.version);
                self.timestamps.append_option(block.timestamp_ms);
                self.changesets.append_option(block.changeset);
                self.uids.append_option(block.uid);
                self.users.append_option(block.user.as_deref());
            }
            None => {
                self.versions.append_null();
                self.timestamps.append_null();
                self.changesets.append_null();
                self.uids.append_null();
                self.users.append_null();
            }
        }
    }

    fn finish_into(&mut self, arrays: &mut Vec<ArrayRef>) {
        arrays.push(Arc::new(self.versions.finish()));
        arrays.push(Arc::new(self.timestamps.finish()));
        arrays.push(Arc::new(self.changesets.finish()));
        arrays.push(Arc::new(self.uids.finish()));
        arrays.push(Arc::new(self.users.finish()));
    }
}
