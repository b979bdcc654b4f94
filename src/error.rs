// Frame-loop errors and the fatal-error policy
//
// Everything the per-frame path can fail with is a FrameError. Timeouts are
// kept apart from other device failures so a hung GPU can be told apart from
// a lost device (and simulated in tests). Nothing here retries: the binary
// hands every error to `fatal`, which logs and aborts.

use ash::vk;
use thiserror::Error;

/// Failure of a GPU call on the frame path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// A frame slot's fence did not signal within the configured timeout.
    #[error("fence wait timed out after {timeout_ns} ns (GPU hang?)")]
    FenceTimeout { timeout_ns: u64 },

    /// The presentation engine had no image ready within the timeout.
    #[error("swapchain image acquisition timed out after {timeout_ns} ns")]
    AcquireTimeout { timeout_ns: u64 },

    /// The surface changed under the swapchain (e.g. a resize).
    /// Swapchain recreation is not implemented; treated as fatal.
    #[error("presentation surface is out of date")]
    SurfaceOutOfDate,

    /// Any other failing Vulkan call.
    #[error("{call} failed: {result}")]
    Device {
        call: &'static str,
        result: vk::Result,
    },

    /// The memory allocator could not back a resource.
    #[error("GPU memory allocation failed: {0}")]
    Allocation(String),
}

impl FrameError {
    /// Builds a mapper for `map_err` that tags a raw `vk::Result` with the
    /// name of the call that produced it.
    pub fn device(call: &'static str) -> impl Fn(vk::Result) -> FrameError {
        move |result| FrameError::Device { call, result }
    }

    /// True for the timeout class (fence wait or image acquisition).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            FrameError::FenceTimeout { .. } | FrameError::AcquireTimeout { .. }
        )
    }
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

/// Log an unrecoverable error with its full context and abort the process.
///
/// Desynchronized CPU/GPU state has no safe local recovery, so there is no
/// unwinding path out of the frame loop.
pub fn fatal(err: &anyhow::Error) -> ! {
    match err.downcast_ref::<FrameError>() {
        Some(frame_err) if frame_err.is_timeout() => {
            log::error!("GPU timeout, aborting: {:?}", err);
        }
        _ => {
            log::error!("Fatal device error, aborting: {:?}", err);
        }
    }
    log::logger().flush();
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_class_is_distinct() {
        assert!(FrameError::FenceTimeout { timeout_ns: 5 }.is_timeout());
        assert!(FrameError::AcquireTimeout { timeout_ns: 5 }.is_timeout());
        assert!(!FrameError::SurfaceOutOfDate.is_timeout());
        assert!(!FrameError::Device {
            call: "vkQueueSubmit2",
            result: vk::Result::ERROR_DEVICE_LOST,
        }
        .is_timeout());
    }

    #[test]
    fn test_device_mapper_keeps_call_name() {
        let err = FrameError::device("vkResetFences")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert_eq!(
            err,
            FrameError::Device {
                call: "vkResetFences",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            }
        );
        assert!(err.to_string().starts_with("vkResetFences failed"));
    }
}
