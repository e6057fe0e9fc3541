/*!
# Vizboard

The project-workspace data layer of a multi-tenant data-visualization web
product, built in Rust.

## Overview

Users upload spreadsheets, the system stores and previews them, derives
charts, and lets project members collaborate live. This crate implements the
pipeline behind that product surface: ingesting an uploaded tabular file,
extracting its schema and preview, encrypting user data at rest, decrypting
it fail-soft on read, aggregating usage statistics across the corpus, and
relaying room-scoped real-time collaboration events between connected
clients.

## Architecture

The application follows a client-server architecture:

### Data Layer
- **Codec** - AES-256-CBC envelope encryption for every persisted field
  that holds user data; decryption degrades to empty values instead of
  failing a whole listing
- **Document Store** - one JSON file per uploaded spreadsheet under the
  database directory, plaintext metadata plus encrypted schema/preview
- **Aggregation** - grouped counts (file type, ISO week, project, user)
  recomputed from plaintext metadata on every dashboard request

### Collaboration Layer
- **Room Registry** - in-memory, room-keyed membership of live websocket
  connections; edit and presence events are relayed to the other members
  of the same room and never persisted
- **Session Binding** - the per-connection lifecycle tying one websocket
  to the registry

### Web Layer
- axum router with multipart upload, document listing/detail/delete,
  aggregate statistics, and the collaboration websocket, behind an
  identity-extracting middleware

## Modules

- **codec**: envelope encryption and the fail-soft decode boundary
- **parse**: CSV and XLSX upload parsing into headers plus row objects
- **documents**: the persisted document store
- **aggregate**: dashboard bucket queries
- **rooms**: the collaboration broadcast registry (web feature)
- **session**: websocket connection lifecycle (web feature)
- **app**: routing and middleware (web feature)

## REST API Endpoints

- `POST /api/upload` - ingest a spreadsheet, returns plaintext preview
- `GET /api/documents/recent` - most recent uploads for the caller
- `GET /api/documents/{id}` / `DELETE /api/documents/{id}`
- `GET /api/projects/{project}/documents` - corruption-tolerant listing
- `DELETE /api/projects/{project}/documents` - project cascade
- `GET /api/stats` - aggregate buckets for dashboards
- `GET /ws` - the collaboration socket
*/

// Re-export all modules so they appear in the documentation
pub mod aggregate;
pub mod codec;
pub mod documents;
pub mod parse;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod rooms;
#[cfg(feature = "web")]
pub mod session;

/// Re-export the core types to make them easier to use
pub use aggregate::AggregateBucket;
pub use codec::{Codec, CodecError};
pub use documents::{DocumentStore, DocumentView, StoreError, StoredDocument};
pub use parse::{ParseError, ParsedSheet, Row};
