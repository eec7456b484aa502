use crate::model::ImageRef;
use std::collections::HashMap;

/// What a locally available image runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub greeting: String,
    pub digest: Option<String>,
}

/// Images the local runtime can start, keyed by `name:tag`.
#[derive(Debug, Clone, Default)]
pub struct ImageCatalog {
    images: HashMap<(String, String), ImageSpec>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, image: &ImageRef, greeting: impl Into<String>) {
        self.images.insert(
            (image.name.clone(), image.tag.clone()),
            ImageSpec {
                greeting: greeting.into(),
                digest: image.digest.clone(),
            },
        );
    }

    pub fn with_image(mut self, image: &ImageRef, greeting: impl Into<String>) -> Self {
        self.register(image, greeting);
        self
    }

    /// Resolve a reference. A digest on either side must agree with the
    /// other side's digest when both are present.
    pub fn resolve(&self, image: &ImageRef) -> Option<&ImageSpec> {
        let spec = self.images.get(&(image.name.clone(), image.tag.clone()))?;
        match (&image.digest, &spec.digest) {
            (Some(wanted), Some(have)) if wanted != have => None,
            _ => Some(spec),
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
