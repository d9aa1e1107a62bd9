use crate::types::{Feature, GeometryCollection};
use geo::{BoundingRect, Contains, Point};
use rstar::{RTree, RTreeObject, AABB};

// Wrapper for RTree indexing
struct FeatureEnvelope {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for FeatureEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Bounding-box index over a collection, used to find the feature under the cursor.
pub struct FeatureIndex {
    tree: RTree<FeatureEnvelope>,
}

impl FeatureIndex {
    pub fn build(collection: &GeometryCollection) -> Self {
        let items: Vec<FeatureEnvelope> = collection
            .features
            .iter()
            .enumerate()
            .filter_map(|(index, feature)| {
                let rect = feature.geometry.bounding_rect()?;
                Some(FeatureEnvelope {
                    index,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        FeatureIndex {
            tree: RTree::bulk_load(items),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First feature (in file order) whose polygon contains the point.
    pub fn locate<'a>(&self, collection: &'a GeometryCollection, lon: f64, lat: f64) -> Option<&'a Feature> {
        let point = Point::new(lon, lat);
        let envelope = AABB::from_point([lon, lat]);

        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|candidate| candidate.index)
            .filter(|&i| {
                collection
                    .features
                    .get(i)
                    .map_or(false, |f| f.geometry.contains(&point))
            })
            .min()
            .and_then(|i| collection.features.get(i))
    }
}
