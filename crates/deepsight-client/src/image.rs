use std::borrow::Cow;
use std::sync::Arc;

use deepsight_core::{ImageDesc, ImageHandle, ImageRef, Result};

use crate::session::Shared;

/// An in-memory image with a typed ownership tag.
///
/// The two ownership classes have disjoint release paths and must never be
/// mixed (releasing caller-owned pixels through the runtime is undefined
/// behavior in the vendor contract):
///
/// - **caller-owned** ([`Image::from_raw`]): the pixel buffer belongs to
///   the caller and is dropped like any other allocation;
/// - **library-owned** (`Session::load_image*`): the runtime holds the
///   pixel memory and the handle must be released through the session
///   exactly once — explicitly via [`Image::release`] or on drop.
///
/// The storage enum makes the wrong release call unrepresentable: there is
/// no way to route caller pixels into the runtime's free routine.
#[derive(Debug)]
pub struct Image {
    desc: ImageDesc,
    storage: Storage,
    released: bool,
}

#[derive(Debug)]
enum Storage {
    /// Pixels owned by the caller; the runtime never frees them.
    Caller { pixels: Vec<u8> },
    /// Pixels owned by the runtime; released through the owning session.
    Library {
        shared: Arc<Shared>,
        handle: ImageHandle,
    },
}

impl Image {
    /// Wrap a caller-allocated pixel buffer (camera frame, third-party
    /// decoder output). Validates the stride invariant against the buffer
    /// length.
    pub fn from_raw(desc: ImageDesc, pixels: Vec<u8>) -> Result<Self> {
        desc.validate(pixels.len())?;
        Ok(Self {
            desc,
            storage: Storage::Caller { pixels },
            released: false,
        })
    }

    pub(crate) fn from_library(shared: Arc<Shared>, handle: ImageHandle, desc: ImageDesc) -> Self {
        Self {
            desc,
            storage: Storage::Library { shared, handle },
            released: false,
        }
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn channels(&self) -> u32 {
        self.desc.channels
    }

    pub fn is_caller_owned(&self) -> bool {
        matches!(self.storage, Storage::Caller { .. })
    }

    /// Pixel bytes. Borrowed for caller-owned images; fetched from the
    /// runtime for library-owned ones.
    pub fn pixels(&self) -> Result<Cow<'_, [u8]>> {
        match &self.storage {
            Storage::Caller { pixels } => Ok(Cow::Borrowed(pixels)),
            Storage::Library { shared, handle } => {
                shared.library_image_pixels(*handle).map(Cow::Owned)
            }
        }
    }

    /// The borrowed form passed across the backend boundary.
    pub fn as_image_ref(&self) -> ImageRef<'_> {
        match &self.storage {
            Storage::Caller { pixels } => ImageRef::Raw {
                desc: &self.desc,
                data: pixels,
            },
            Storage::Library { handle, .. } => ImageRef::Handle(*handle),
        }
    }

    /// Explicitly release the image. For caller-owned images this is a
    /// plain drop; for library-owned images the handle is returned to the
    /// runtime, surfacing any fault the implicit drop would only log.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        match &self.storage {
            Storage::Caller { .. } => Ok(()),
            Storage::Library { shared, handle } => shared.free_library_image(*handle),
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Storage::Library { shared, handle } = &self.storage {
            // After session close the runtime has already swept the
            // allocation; freeing again would be a double free.
            if let Err(err) = shared.free_library_image(*handle) {
                tracing::warn!(handle, error = %err, "failed to free image on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepsight_core::PixelDepth;

    #[test]
    fn from_raw_validates_stride() {
        let desc = ImageDesc::packed(4, 4, 3, PixelDepth::U8);
        assert!(Image::from_raw(desc, vec![0u8; 48]).is_ok());
        assert!(Image::from_raw(desc, vec![0u8; 47]).is_err());

        let bad = ImageDesc { step: 11, ..desc };
        assert!(Image::from_raw(bad, vec![0u8; 48]).is_err());
    }

    #[test]
    fn caller_owned_pixels_borrowed() {
        let desc = ImageDesc::packed(2, 2, 1, PixelDepth::U8);
        let img = Image::from_raw(desc, vec![42u8; 4]).unwrap();
        assert!(img.is_caller_owned());
        assert_eq!(img.pixels().unwrap().as_ref(), &[42u8; 4]);
        // Release of a caller-owned image never touches a backend.
        img.release().unwrap();
    }
}
