//! Images domain: state, reducer and change events.

use std::collections::BTreeMap;

use sync_types::{ContentDigest, Image, ImageId, Operation, Payload, UserId};

use crate::reducer::{changed_keys, Reducer};
use crate::register::Register;
use crate::sequence::Sequence;

/// Materialized images state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagesState {
    images_order: Sequence<ImageId>,
    images: BTreeMap<ImageId, Register<Image>>,
}

/// Change events for the images domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChange {
    /// Images were added to or removed from the list.
    ListChanged,
    /// An image's content changed.
    ImageChanged(ImageId),
}

/// Comparable snapshot of [`ImagesState`]. Images compare by digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImagesView {
    order: Vec<ImageId>,
    digests: BTreeMap<ImageId, ContentDigest>,
}

impl ImagesState {
    /// Look up an image.
    pub fn image(&self, id: &ImageId) -> Option<Image> {
        self.images.get(id)?.get().cloned()
    }

    /// All images, most recent upload first.
    pub fn images(&self) -> Vec<Image> {
        self.images_order
            .elements()
            .into_iter()
            .filter_map(|id| self.image(&id))
            .collect()
    }

    /// The image with exactly this content, if one was uploaded.
    pub fn find_by_digest(&self, digest: &ContentDigest) -> Option<ImageId> {
        self.images_order.elements().into_iter().find(|id| {
            self.images
                .get(id)
                .and_then(Register::get)
                .is_some_and(|image| image.digest == *digest)
        })
    }

    /// True if any operation mentioned this id.
    pub fn knows(&self, id: &ImageId) -> bool {
        self.images.contains_key(id)
    }
}

impl Reducer for ImagesState {
    type View = ImagesView;
    type Change = ImageChange;

    fn apply(&mut self, operation: &Operation) {
        let stamp = operation.stamp();
        match operation.payload() {
            Payload::UploadImage {
                image_id,
                media_type,
                data,
            } => {
                let image = Image::new(*image_id, media_type.clone(), data.clone());
                self.images.entry(*image_id).or_default().write(stamp, image);
                self.images_order.insert(*image_id, None, stamp);
            }
            Payload::CreateUser { .. }
            | Payload::UpdateDisplayName { .. }
            | Payload::UpdateAvatar { .. }
            | Payload::BindUser { .. }
            | Payload::CreateSpendingGroup { .. }
            | Payload::RenameSpendingGroup { .. }
            | Payload::AddGroupParticipant { .. }
            | Payload::DeleteSpendingGroup { .. }
            | Payload::CreateSpending { .. }
            | Payload::DeleteSpending { .. }
            | Payload::Unknown => {}
        }
    }

    fn view(&self, _viewer: &UserId) -> ImagesView {
        let order = self.images_order.elements();
        let digests = order
            .iter()
            .filter_map(|id| self.image(id).map(|image| (*id, image.digest)))
            .collect();
        ImagesView { order, digests }
    }

    fn diff(old: &ImagesView, new: &ImagesView) -> Vec<ImageChange> {
        let mut changes = Vec::new();
        if old.order != new.order {
            changes.push(ImageChange::ListChanged);
        }
        changes.extend(
            changed_keys(&old.digests, &new.digests)
                .into_iter()
                .map(ImageChange::ImageChanged),
        );
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{image, op, permutations, user};
    use sync_types::content_digest;

    fn upload(n: u8, at: u64, id: u8, data: &[u8]) -> Operation {
        op(
            n,
            at,
            1,
            Payload::UploadImage {
                image_id: image(id),
                media_type: "image/png".into(),
                data: data.to_vec(),
            },
        )
    }

    #[test]
    fn upload_then_query() {
        let state = ImagesState::fold(&[upload(1, 1, 1, b"png")]);
        let stored = state.image(&image(1)).unwrap();
        assert_eq!(stored.data, b"png");
        assert_eq!(stored.media_type, "image/png");
        assert_eq!(state.find_by_digest(&content_digest(b"png")), Some(image(1)));
        assert!(state.find_by_digest(&content_digest(b"jpg")).is_none());
    }

    #[test]
    fn uploads_converge_newest_first() {
        let ops = [upload(1, 1, 1, b"a"), upload(2, 2, 2, b"b"), upload(3, 3, 3, b"c")];
        for order in permutations(&ops) {
            let ids: Vec<ImageId> = ImagesState::fold(order)
                .images()
                .into_iter()
                .map(|i| i.id)
                .collect();
            assert_eq!(ids, vec![image(3), image(2), image(1)]);
        }
    }

    #[test]
    fn diff_reports_new_image() {
        let before = ImagesState::default();
        let after = before.clone().reduce(&upload(1, 1, 1, b"a"));
        assert_eq!(
            ImagesState::diff(&before.view(&user(1)), &after.view(&user(1))),
            vec![ImageChange::ListChanged, ImageChange::ImageChanged(image(1))]
        );
    }
}
