/*!
# CSV Visualizer

A small authenticated web application for turning CSV files into charts, built in Rust.

## Overview

A logged-in user uploads up to five CSV files per session, picks an X and a Y
column from one of them and renders a bar, line or scatter chart as a PNG.
The data point with the largest Y value is highlighted in red, every other
point is grey. Charts can be viewed inline or downloaded.

## Architecture

### Web Layer (`web` feature)
- **Technologies**: axum, axum-extra cookies, tower-http, handlebars
- **Key Components**:
  - Login / logout handlers and the authentication middleware (`auth`)
  - Router, dashboard and file / chart handlers (`app`)

### Core Layer
- **Upload validation** - size, extension and CSV structure checks (`validator`)
- **Session state** - per-session file records, active chart and flash messages (`session`)
- **File store** - stores, replaces and deletes uploads on disk (`files`)
- **Chart engine** - reads two columns and renders a PNG with plotters (`chart`)
- **Housekeeping** - startup sweep of stale session data (`housekeeping`)
- **Event log** - JSON lines business events with size based rotation (`events`)

### Storage Layout

```text
instance/
├── uploads/<session_dir_id>/<sanitized name>.csv
├── charts/<session_dir_id>/<stem>_<type>.png
└── events.log
```

## Modules

- **config**: Runtime configuration and instance paths
- **error**: Error types with user facing messages
- **validator**: Upload validation
- **session**: Session state and the session store
- **files**: Per-session file management
- **chart**: Chart data extraction and rendering
- **housekeeping**: Removal of stale uploads and charts
- **events**: Event log and logger setup
- **auth**: Credential checking, login and logout
- **app**: Routing and handlers

## HTTP Endpoints

- `/login`, `/logout` - Session management
- `/dashboard` - File list, column pickers and the current chart
- `/upload`, `/update_file/{id}`, `/delete_file/{id}` - File operations
- `/generate_chart` - Renders a chart for the chosen columns
- `/charts/{filename}` - Serves (or with `?download=1` downloads) a chart
*/

pub mod auth;
pub mod chart;
pub mod config;
pub mod error;
pub mod events;
pub mod files;
pub mod housekeeping;
pub mod session;
pub mod validator;

#[cfg(feature = "web")]
pub mod app;

pub use config::{Config, InstancePaths};
pub use error::*;
