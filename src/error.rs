//! Error types.
//!
//! Only recoverable conditions get an error type. Misuse such as calling
//! from the wrong thread panics instead.

use std::path::PathBuf;

/// A resource could not be loaded by a [`ResourceLoader`](crate::ResourceLoader).
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Nothing exists under this key.
    #[error("resource {namespace}:{path} not found")]
    NotFound {
        /// Resource namespace.
        namespace: String,
        /// Path within the namespace.
        path: String,
    },
    /// Reading failed.
    #[error("can't read {}: {source}", file.display())]
    Io {
        /// The file that was being read.
        file: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Shader cache failures. These end up in the log and as sentinel entries,
/// never as panics.
#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    /// The path suffix names no known stage.
    #[error("unknown shader stage for {namespace}:{path}")]
    UnknownStage {
        /// Resource namespace.
        namespace: String,
        /// Path within the namespace.
        path: String,
    },
    /// The source could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// The source is not UTF-8.
    #[error("shader source {namespace}:{path} is not UTF-8")]
    Encoding {
        /// Resource namespace.
        namespace: String,
        /// Path within the namespace.
        path: String,
    },
    /// The driver rejected the source.
    #[error("failed to compile {namespace}:{path}:\n{log}")]
    Compile {
        /// Resource namespace.
        namespace: String,
        /// Path within the namespace.
        path: String,
        /// The driver's info log.
        log: String,
    },
    /// The driver rejected the attached shaders.
    #[error("failed to link program {program}:\n{log}")]
    Link {
        /// Native program name.
        program: u32,
        /// The driver's info log.
        log: String,
    },
    /// The driver refused to create a shader object.
    #[error("can't create shader object for {namespace}:{path}")]
    Create {
        /// Resource namespace.
        namespace: String,
        /// Path within the namespace.
        path: String,
    },
}

/// A [`Server`](crate::Server) could not be created for the current context.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The context lacks baseline features. The list is meant for the user.
    #[error("missing required GPU capabilities: {}", .0.join(", "))]
    MissingCapabilities(Vec<&'static str>),
}

/// A texture file could not be turned into pixels.
#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    /// The file could not be loaded.
    #[error(transparent)]
    Load(#[from] LoadError),
    /// The file is not a supported image.
    #[error("can't decode texture {namespace}:{path}: {source}")]
    Decode {
        /// Resource namespace.
        namespace: String,
        /// Path within the namespace.
        path: String,
        /// The decoder's error.
        #[source]
        source: image::ImageError,
    },
    /// The image has no pixels or exceeds the packed dimension range.
    #[error("texture {namespace}:{path} has unsupported size {width}x{height}")]
    Size {
        /// Resource namespace.
        namespace: String,
        /// Path within the namespace.
        path: String,
        /// Decoded width.
        width: u32,
        /// Decoded height.
        height: u32,
    },
}
