//! Decoder tests and a minimal payload builder

use super::*;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Field {
    U8(u8),
    U32(u32),
    I32(i32),
    F32(f32),
    Ref,
}

/// Lays out tables, vtables and vectors the way the device encoder does.
/// Children are always appended after their parents so offsets stay forward.
pub(crate) struct PayloadBuilder {
    buf: Vec<u8>,
}

impl PayloadBuilder {
    pub(crate) fn new() -> Self {
        Self { buf: vec![0; 4] }
    }

    fn align(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    fn put_u16_at(&mut self, at: usize, value: u16) {
        self.buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32_at(&mut self, at: usize, value: u32) {
        self.buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Returns the table position and the positions of its `Ref` fields
    pub(crate) fn table(&mut self, fields: &[(u16, Field)]) -> (usize, Vec<usize>) {
        self.align();
        let max_slot = fields.iter().map(|(slot, _)| *slot).max().unwrap_or(2);
        let vtable_len = max_slot + 2;
        let vtable_pos = self.buf.len();
        self.buf.resize(vtable_pos + vtable_len as usize, 0);
        self.align();

        let table_pos = self.buf.len();
        self.buf
            .extend_from_slice(&((table_pos - vtable_pos) as i32).to_le_bytes());

        let mut refs = Vec::new();
        for (slot, field) in fields {
            let field_pos = self.buf.len();
            self.put_u16_at(vtable_pos + *slot as usize, (field_pos - table_pos) as u16);
            match field {
                Field::U8(v) => self.buf.extend_from_slice(&[*v, 0, 0, 0]),
                Field::U32(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
                Field::I32(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
                Field::F32(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
                Field::Ref => {
                    refs.push(field_pos);
                    self.buf.extend_from_slice(&[0; 4]);
                }
            }
        }

        let table_len = (self.buf.len() - table_pos) as u16;
        self.put_u16_at(vtable_pos, vtable_len);
        self.put_u16_at(vtable_pos + 2, table_len);
        (table_pos, refs)
    }

    /// Returns the vector position and the positions of its element offsets
    pub(crate) fn vector(&mut self, count: usize) -> (usize, Vec<usize>) {
        self.align();
        let pos = self.buf.len();
        self.buf.extend_from_slice(&(count as u32).to_le_bytes());
        self.buf.resize(pos + 4 + count * 4, 0);
        (pos, (0..count).map(|i| pos + 4 + i * 4).collect())
    }

    pub(crate) fn link(&mut self, at: usize, target: usize) {
        self.put_u32_at(at, (target - at) as u32);
    }

    pub(crate) fn finish(mut self, root: usize) -> Vec<u8> {
        self.put_u32_at(0, root as u32);
        self.buf
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TestDetection {
    pub class_id: Option<u32>,
    pub score: Option<f32>,
    pub bbox_type: Option<u8>,
    pub bbox: Option<[Option<i32>; 4]>,
    pub corrupt_offset: bool,
}

impl TestDetection {
    pub(crate) fn boxed(class_id: u32, score: f32, bbox: [i32; 4]) -> Self {
        Self {
            class_id: Some(class_id),
            score: Some(score),
            bbox_type: Some(BOUNDING_BOX_2D),
            bbox: Some(bbox.map(Some)),
            corrupt_offset: false,
        }
    }
}

pub(crate) fn encode(items: &[TestDetection]) -> Vec<u8> {
    let mut b = PayloadBuilder::new();
    let (root, root_refs) = b.table(&[(4, Field::Ref)]);
    let (perception, perception_refs) = b.table(&[(4, Field::Ref)]);
    b.link(root_refs[0], perception);
    let (list, elements) = b.vector(items.len());
    b.link(perception_refs[0], list);

    for (item, element) in items.iter().zip(elements) {
        let mut fields = Vec::new();
        if let Some(class_id) = item.class_id {
            fields.push((4, Field::U32(class_id)));
        }
        if let Some(bbox_type) = item.bbox_type {
            fields.push((6, Field::U8(bbox_type)));
        }
        if item.bbox.is_some() {
            fields.push((8, Field::Ref));
        }
        if let Some(score) = item.score {
            fields.push((10, Field::F32(score)));
        }
        let (table, refs) = b.table(&fields);

        if item.corrupt_offset {
            b.put_u32_at(element, 0x7FFF_FFF0);
        } else {
            b.link(element, table);
        }

        if let Some(coords) = item.bbox {
            let bbox_fields: Vec<(u16, Field)> = [4u16, 6, 8, 10]
                .into_iter()
                .zip(coords)
                .filter_map(|(slot, value)| value.map(|v| (slot, Field::I32(v))))
                .collect();
            let (bbox_table, _) = b.table(&bbox_fields);
            b.link(refs[0], bbox_table);
        }
    }

    b.finish(root)
}

#[test]
fn test_decodes_all_detections_in_order() {
    let buf = encode(&[
        TestDetection::boxed(0, 0.91, [10, 20, 110, 220]),
        TestDetection::boxed(3, 0.42, [-5, 0, 40, 80]),
        TestDetection::boxed(0, 0.77, [300, 310, 320, 330]),
    ]);

    let set = decode(&buf);
    assert_eq!(set.len(), 3);
    assert_eq!(
        set.get(0),
        Some(&Detection {
            class_id: 0,
            score: 0.91,
            left: 10,
            top: 20,
            right: 110,
            bottom: 220,
        })
    );
    assert_eq!(set.get(1).map(|d| (d.class_id, d.left)), Some((3, -5)));
    assert_eq!(set.get(1).map(|d| d.score), Some(0.42));
    assert_eq!(set.get(2).map(|d| d.bottom), Some(330));
}

#[test]
fn test_absent_fields_use_defaults() {
    let buf = encode(&[TestDetection {
        class_id: None,
        score: None,
        bbox_type: Some(BOUNDING_BOX_2D),
        bbox: Some([Some(1), None, Some(3), None]),
        corrupt_offset: false,
    }]);

    let set = decode(&buf);
    assert_eq!(
        set.get(0),
        Some(&Detection {
            class_id: 0,
            score: 0.0,
            left: 1,
            top: 0,
            right: 3,
            bottom: 0,
        })
    );
}

#[test]
fn test_unsupported_box_type_is_omitted() {
    let mut other = TestDetection::boxed(0, 0.5, [1, 1, 2, 2]);
    other.bbox_type = Some(2);

    let buf = encode(&[
        TestDetection::boxed(0, 0.8, [1, 2, 3, 4]),
        other,
        TestDetection::boxed(5, 0.6, [5, 6, 7, 8]),
    ]);

    let set = decode(&buf);
    assert_eq!(set.len(), 2);
    assert_eq!(set.get(0).map(|d| d.left), Some(1));
    assert_eq!(set.get(1).map(|d| d.class_id), Some(5));
}

#[test]
fn test_missing_box_type_or_table_is_omitted() {
    let no_type = TestDetection {
        bbox_type: None,
        ..TestDetection::boxed(0, 0.5, [1, 1, 2, 2])
    };
    let no_table = TestDetection {
        bbox: None,
        ..TestDetection::boxed(0, 0.5, [1, 1, 2, 2])
    };

    let buf = encode(&[no_type, no_table, TestDetection::boxed(9, 0.1, [0, 0, 1, 1])]);
    let set = decode(&buf);
    assert_eq!(set.len(), 1);
    assert_eq!(set.get(0).map(|d| d.class_id), Some(9));
}

#[test]
fn test_corrupt_element_offset_skips_only_that_index() {
    let mut corrupt = TestDetection::boxed(0, 0.5, [1, 1, 2, 2]);
    corrupt.corrupt_offset = true;

    let buf = encode(&[
        TestDetection::boxed(1, 0.9, [10, 10, 20, 20]),
        corrupt,
        TestDetection::boxed(2, 0.8, [30, 30, 40, 40]),
    ]);

    let set = decode(&buf);
    assert_eq!(set.len(), 2);
    assert_eq!(set.get(0).map(|d| d.class_id), Some(1));
    assert_eq!(set.get(1).map(|d| d.class_id), Some(2));
}

#[test]
fn test_short_buffer_and_zero_root_decode_empty() {
    assert!(decode(&[]).is_empty());
    assert!(decode(&[1, 0, 0]).is_empty());
    assert_eq!(try_decode(&[1, 0]), Err(DecodeError::TooShort { len: 2 }));

    let zero_root = [0u8; 32];
    assert!(decode(&zero_root).is_empty());
    assert_eq!(try_decode(&zero_root), Err(DecodeError::ZeroRootOffset));
}

#[test]
fn test_root_offset_past_end_is_top_level_error() {
    let buf = [0xF0, 0, 0, 0, 0, 0, 0, 0];
    assert!(matches!(
        try_decode(&buf),
        Err(DecodeError::OutOfBounds { .. })
    ));
    assert!(decode(&buf).is_empty());
}

#[test]
fn test_missing_perception_is_empty_not_error() {
    let mut b = PayloadBuilder::new();
    let (root, _) = b.table(&[]);
    let buf = b.finish(root);

    assert_eq!(try_decode(&buf), Ok(DetectionSet::default()));
}

#[test]
fn test_empty_detection_list() {
    let buf = encode(&[]);
    assert_eq!(try_decode(&buf), Ok(DetectionSet::default()));
}

#[test]
fn test_every_truncation_decodes_without_panic() {
    let buf = encode(&[
        TestDetection::boxed(0, 0.9, [1, 2, 3, 4]),
        TestDetection::boxed(0, 0.8, [5, 6, 7, 8]),
    ]);

    for len in 0..buf.len() {
        let set = decode(&buf[..len]);
        assert!(set.len() <= 2, "prefix {} produced {} detections", len, set.len());
    }
}

#[test]
fn test_overstated_list_length_keeps_real_detections() {
    let buf = encode(&[
        TestDetection::boxed(0, 0.9, [1, 2, 3, 4]),
        TestDetection::boxed(4, 0.8, [5, 6, 7, 8]),
    ]);

    // Locate the vector header through the decoder's own walk and inflate it.
    let cursor = ByteCursor::new(&buf);
    let root = Table::at(cursor, cursor.read_u32(0).unwrap() as usize);
    let perception = root.table(4).unwrap().unwrap();
    let field = perception.field(4).unwrap().unwrap();
    let header = cursor.indirect(field).unwrap();

    let mut inflated = buf.clone();
    inflated[header..header + 4].copy_from_slice(&1_000_000u32.to_le_bytes());

    let readable = {
        let cursor = ByteCursor::new(&inflated);
        let root = Table::at(cursor, cursor.read_u32(0).unwrap() as usize);
        let list = root.table(4).unwrap().unwrap().table_vector(4).unwrap().unwrap();
        assert_eq!(list.len(), 1_000_000);
        list.addressable_len()
    };

    let set = decode(&inflated);
    assert!(set.len() >= 2);
    assert!(set.len() <= readable, "{} detections from {} readable offsets", set.len(), readable);
    assert_eq!(
        set.get(0),
        Some(&Detection {
            class_id: 0,
            score: 0.9,
            left: 1,
            top: 2,
            right: 3,
            bottom: 4,
        })
    );
    assert_eq!(
        set.get(1),
        Some(&Detection {
            class_id: 4,
            score: 0.8,
            left: 5,
            top: 6,
            right: 7,
            bottom: 8,
        })
    );
}
