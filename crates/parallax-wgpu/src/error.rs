//! Error types for parallax-wgpu
//!
//! Every failure in this crate is fail-fast: configuration problems surface when a
//! pass or program is constructed, dispatch-limit violations abort the frame that
//! recorded them, and resource-state misuse is reported as a programmer error.

/// Errors produced by the heightmap derivation pipeline and the render passes
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device lacks a feature a pass depends on
    #[error("unsupported device feature: {0}")]
    UnsupportedFeature(&'static str),

    /// The device lacks a downlevel capability a pass depends on
    #[error("missing downlevel capability: {0}")]
    MissingDownlevelCapability(&'static str),

    /// Scene geometry must be a triangle list
    #[error("only triangle list geometry is supported, got {0:?}")]
    UnsupportedTopology(wgpu::PrimitiveTopology),

    /// A dispatch would exceed the per-dimension workgroup limit
    #[error("dispatch of {groups:?} workgroups exceeds the per-dimension maximum of {limit}")]
    DispatchLimitExceeded {
        /// Requested workgroup counts
        groups: [u32; 3],
        /// Device limit per dimension
        limit: u32,
    },

    /// No structured buffer with the given name was allocated
    #[error("{0}: couldn't find buffer to map")]
    BufferNotFound(String),

    /// The named buffer is already mapped
    #[error("{0}: buffer already mapped")]
    BufferAlreadyMapped(String),

    /// The named buffer is not mapped
    #[error("{0}: buffer not mapped")]
    BufferNotMapped(String),

    /// Initial data for a structured buffer has the wrong size
    #[error("structured buffer '{name}' initial data size mismatch: expected {expected} bytes, got {actual}")]
    InitDataSizeMismatch {
        /// Buffer name
        name: String,
        /// Size implied by element size and count
        expected: u64,
        /// Size of the provided data
        actual: u64,
    },

    /// Texture dimensions must be at least 1x1
    #[error("invalid texture size {width}x{height}")]
    InvalidTextureSize {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
    },

    /// The texture format is not handled by the readback or packing helpers
    #[error("unsupported texture format: {0:?}")]
    UnsupportedTextureFormat(wgpu::TextureFormat),

    /// Image decoding or encoding failed
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// Waiting on the device failed
    #[error(transparent)]
    Poll(#[from] wgpu::PollError),

    /// Mapping a readback buffer failed
    #[error(transparent)]
    BufferAsync(#[from] wgpu::BufferAsyncError),

    /// The readback channel was closed before the mapping finished
    #[error("buffer mapping was cancelled")]
    MapCancelled,

    /// Filesystem access failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
