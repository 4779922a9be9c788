use std::collections::HashMap;
use std::path::Path;

use image::RgbaImage;

use crate::{LyricSyncError, Result};

/// Resolves an asset reference into a decoded image.
pub trait ImageLoader {
    fn load(&self, url: &str) -> Result<RgbaImage>;
}

/// Loads images from local paths. `file://` prefixes are accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsImageLoader;

impl ImageLoader for FsImageLoader {
    fn load(&self, url: &str) -> Result<RgbaImage> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let image = image::open(Path::new(path)).map_err(|err| LyricSyncError::asset(url, err))?;
        Ok(image.into_rgba8())
    }
}

/// Registry of decoded images, addressed by their reference.
#[derive(Debug, Default)]
pub struct AssetStore {
    images: HashMap<String, RgbaImage>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self {
            images: HashMap::new(),
        }
    }

    /// Loads every distinct reference. A single failure aborts the whole
    /// preload and nothing is returned.
    pub fn preload<'a, L, I>(loader: &L, urls: I) -> Result<Self>
    where
        L: ImageLoader + ?Sized,
        I: IntoIterator<Item = &'a str>,
    {
        let mut store = Self::new();
        for url in urls {
            if store.images.contains_key(url) {
                continue;
            }
            let image = loader.load(url)?;
            tracing::debug!(url, width = image.width(), height = image.height(), "preloaded image");
            store.images.insert(url.to_string(), image);
        }
        Ok(store)
    }

    pub fn insert(&mut self, url: impl Into<String>, image: RgbaImage) {
        self.images.insert(url.into(), image);
    }

    pub fn image(&self, url: &str) -> Option<&RgbaImage> {
        self.images.get(url)
    }

    /// Like [`AssetStore::image`] but reports a missing entry as an error.
    pub fn require(&self, url: &str) -> Result<&RgbaImage> {
        self.image(url)
            .ok_or_else(|| LyricSyncError::asset(url, "image was not preloaded"))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use image::Rgba;

    use super::*;

    struct CountingLoader {
        calls: RefCell<Vec<String>>,
        missing: &'static str,
    }

    impl ImageLoader for CountingLoader {
        fn load(&self, url: &str) -> Result<RgbaImage> {
            self.calls.borrow_mut().push(url.to_string());
            if url == self.missing {
                return Err(LyricSyncError::asset(url, "404"));
            }
            Ok(RgbaImage::from_pixel(2, 2, Rgba([1, 2, 3, 255])))
        }
    }

    fn loader() -> CountingLoader {
        CountingLoader {
            calls: RefCell::new(Vec::new()),
            missing: "missing.png",
        }
    }

    #[test]
    fn preloads_each_reference_once() {
        let loader = loader();
        let store = AssetStore::preload(&loader, ["a.png", "b.png", "a.png"]).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(loader.calls.borrow().len(), 2);
        assert!(store.require("b.png").is_ok());
    }

    #[test]
    fn any_failure_aborts_preload() {
        let loader = loader();
        let err = AssetStore::preload(&loader, ["a.png", "missing.png", "c.png"]).unwrap_err();

        assert!(err.to_string().contains("missing.png"));
        assert_eq!(loader.calls.borrow().len(), 2);
    }

    #[test]
    fn errors_on_missing_entries() {
        let store = AssetStore::new();
        let err = store.require("nope.png").unwrap_err();
        assert!(format!("{err}").contains("nope.png"));
    }

    #[test]
    fn fs_loader_reports_unavailable_files() {
        let err = FsImageLoader.load("file:///no/such/image.png").unwrap_err();
        assert!(matches!(err, LyricSyncError::AssetUnavailable { .. }));
    }
}
