use crate::error::{GraphError, Result};
use crate::model::NodeId;
use crate::pager::{PageId, Pager};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

use super::graphdb::IndexableValue;

const PROPERTY_INDEX_MAGIC: &[u8; 4] = b"PIDX";
const PROPERTY_INDEX_VERSION: u16 = 1;

type PropertyIndexMap = HashMap<(String, String), BTreeMap<IndexableValue, BTreeSet<NodeId>>>;
type IndexEntry = BTreeMap<IndexableValue, BTreeSet<NodeId>>;

pub struct PropertyIndexSerializer<'a> {
    pager: &'a mut Pager,
}

impl<'a> PropertyIndexSerializer<'a> {
    pub fn new(pager: &'a mut Pager) -> Self {
        Self { pager }
    }

    pub fn serialize_indexes(&mut self, indexes: &PropertyIndexMap) -> Result<(PageId, u32, Vec<PageId>)> {
        if indexes.is_empty() {
            return Ok((0, 0, Vec::new()));
        }

        let mut serialized_data = Vec::new();

        serialized_data.extend_from_slice(PROPERTY_INDEX_MAGIC);
        serialized_data.extend_from_slice(&PROPERTY_INDEX_VERSION.to_le_bytes());

        let count = indexes.len() as u32;
        serialized_data.extend_from_slice(&count.to_le_bytes());

        for ((label, property_key), index) in indexes {
            self.serialize_single_index(&mut serialized_data, label, property_key, index)?;
        }

        let (root_page, written_pages) = self.write_serialized_data(&serialized_data)?;

        info!(
            count = indexes.len(),
            root_page,
            size_bytes = serialized_data.len(),
            "Serialized property indexes"
        );

        Ok((root_page, count, written_pages))
    }

    pub fn collect_old_pages(&mut self, root_page: PageId) -> Result<Vec<PageId>> {
        let mut pages = Vec::new();
        let mut current_page = root_page;

        while current_page != 0 {
            pages.push(current_page);

            let next_page = self.pager.with_page(current_page, |page_data| {
                let next =
                    u32::from_le_bytes([page_data[4], page_data[5], page_data[6], page_data[7]]);
                Ok(next)
            })?;

            current_page = next_page;
        }

        Ok(pages)
    }

    fn serialize_single_index(
        &self,
        data: &mut Vec<u8>,
        label: &str,
        property_key: &str,
        index: &IndexEntry,
    ) -> Result<()> {
        let label_bytes = label.as_bytes();
        data.extend_from_slice(&(label_bytes.len() as u32).to_le_bytes());
        data.extend_from_slice(label_bytes);

        let property_key_bytes = property_key.as_bytes();
        data.extend_from_slice(&(property_key_bytes.len() as u32).to_le_bytes());
        data.extend_from_slice(property_key_bytes);

        let entry_count = index.len() as u32;
        data.extend_from_slice(&entry_count.to_le_bytes());

        for (indexable_value, node_ids) in index {
            self.serialize_indexable_value(data, indexable_value)?;

            let node_count = node_ids.len() as u32;
            data.extend_from_slice(&node_count.to_le_bytes());

            for node_id in node_ids {
                data.extend_from_slice(&node_id.to_le_bytes());
            }
        }

        Ok(())
    }

    fn serialize_indexable_value(&self, data: &mut Vec<u8>, value: &IndexableValue) -> Result<()> {
        match value {
            IndexableValue::Bool(b) => {
                data.push(1);
                data.push(if *b { 1 } else { 0 });
            }
            IndexableValue::Int(i) => {
                data.push(2);
                data.extend_from_slice(&i.to_le_bytes());
            }
            IndexableValue::String(s) => {
                data.push(3);
                let s_bytes = s.as_bytes();
                data.extend_from_slice(&(s_bytes.len() as u32).to_le_bytes());
                data.extend_from_slice(s_bytes);
            }
        }
        Ok(())
    }

    fn write_serialized_data(&mut self, data: &[u8]) -> Result<(PageId, Vec<PageId>)> {
        let page_size = self.pager.page_size();
        // Page layout: [4 bytes chunk_len][4 bytes next_page][data]
        // The pager automatically reserves last 4 bytes for checksum
        // Usable space = (page_size - 4 checksum) - 8 (header) = page_size - 12
        let chunk_size = page_size - 12;
        let pages_needed = data.chunks(chunk_size).count();

        if pages_needed == 0 {
            return Err(GraphError::Corruption(
                "no pages needed for property indexes".into(),
            ));
        }

        let mut pages = Vec::new();
        for _i in 0..pages_needed {
            let page_id = self.pager.allocate_page()?;
            pages.push(page_id);
        }

        for (i, chunk) in data.chunks(chunk_size).enumerate() {
            let page_id = pages[i];
            let next_page = if i + 1 < pages.len() { pages[i + 1] } else { 0 };

            let chunk_len = chunk.len() as u32;
            let page = self.pager.fetch_page(page_id)?;
            page.data[0..4].copy_from_slice(&chunk_len.to_le_bytes());
            page.data[4..8].copy_from_slice(&next_page.to_le_bytes());
            page.data[8..8 + chunk.len()].copy_from_slice(chunk);
            page.dirty = true;
        }

        Ok((pages[0], pages))
    }

    pub fn deserialize_indexes(&mut self, root_page: PageId) -> Result<PropertyIndexMap> {
        if root_page == 0 {
            return Ok(HashMap::new());
        }

        let serialized_data = self.read_serialized_data(root_page)?;

        if serialized_data.len() < 10 {
            return Err(GraphError::Corruption(
                "property index data too short".into(),
            ));
        }

        if &serialized_data[0..4] != PROPERTY_INDEX_MAGIC {
            return Err(GraphError::Corruption(
                "invalid property index magic".into(),
            ));
        }

        let version = u16::from_le_bytes([serialized_data[4], serialized_data[5]]);
        if version != PROPERTY_INDEX_VERSION {
            return Err(GraphError::Corruption(format!(
                "unsupported property index version {version}"
            )));
        }

        let count = u32::from_le_bytes([
            serialized_data[6],
            serialized_data[7],
            serialized_data[8],
            serialized_data[9],
        ]);

        let mut indexes = HashMap::new();
        let mut offset = 10;

        for _i in 0..count {
            let (key, index, new_offset) =
                self.deserialize_single_index(&serialized_data, offset)?;
            indexes.insert(key, index);
            offset = new_offset;
        }

        info!(count = indexes.len(), "Deserialized property indexes");

        Ok(indexes)
    }

    fn deserialize_single_index(
        &self,
        data: &[u8],
        mut offset: usize,
    ) -> Result<((String, String), IndexEntry, usize)> {
        if offset + 4 > data.len() {
            return Err(GraphError::Corruption(
                "truncated property index label".into(),
            ));
        }

        let label_len = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += 4;

        if offset + label_len > data.len() {
            return Err(GraphError::Corruption(
                "truncated property index label data".into(),
            ));
        }

        let label = String::from_utf8(data[offset..offset + label_len].to_vec())
            .map_err(|_| GraphError::Corruption("invalid UTF-8 in label".into()))?;
        offset += label_len;

        if offset + 4 > data.len() {
            return Err(GraphError::Corruption("truncated property key".into()));
        }

        let property_key_len = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        offset += 4;

        if offset + property_key_len > data.len() {
            return Err(GraphError::Corruption("truncated property key data".into()));
        }

        let property_key = String::from_utf8(data[offset..offset + property_key_len].to_vec())
            .map_err(|_| GraphError::Corruption("invalid UTF-8 in property key".into()))?;
        offset += property_key_len;

        if offset + 4 > data.len() {
            return Err(GraphError::Corruption("truncated entry count".into()));
        }

        let entry_count = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        offset += 4;

        let mut index = BTreeMap::new();

        for _entry_idx in 0..entry_count {
            let (indexable_value, new_offset) = self.deserialize_indexable_value(data, offset)?;
            offset = new_offset;

            if offset + 4 > data.len() {
                return Err(GraphError::Corruption("truncated node count".into()));
            }

            let node_count = u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]);
            offset += 4;

            if label == "Record" && property_key == "active" {
                eprintln!(
                    "Deserializing value {:?} with node_count {} at offset {}",
                    indexable_value, node_count, offset
                );
            }

            let mut node_ids = BTreeSet::new();
            let mut prev_id: Option<u64> = None;
            for _ in 0..node_count {
                if offset + 8 > data.len() {
                    return Err(GraphError::Corruption("truncated node id".into()));
                }

                let node_id = u64::from_le_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                    data[offset + 4],
                    data[offset + 5],
                    data[offset + 6],
                    data[offset + 7],
                ]);
                offset += 8;
                if label == "Record" && property_key == "active" {
                    if let Some(prev) = prev_id {
                        if node_id <= prev {
                            eprintln!(
                                "Non-increasing node id detected: prev={} current={} at offset {}",
                                prev, node_id, offset
                            );
                        }
                    }
                    prev_id = Some(node_id);
                }
                node_ids.insert(node_id);
            }

            index.insert(indexable_value, node_ids);
        }

        Ok(((label, property_key), index, offset))
    }

    fn deserialize_indexable_value(
        &self,
        data: &[u8],
        mut offset: usize,
    ) -> Result<(IndexableValue, usize)> {
        if offset >= data.len() {
            return Err(GraphError::Corruption(
                "truncated indexable value type".into(),
            ));
        }

        let value_type = data[offset];
        offset += 1;

        match value_type {
            1 => {
                if offset >= data.len() {
                    return Err(GraphError::Corruption("truncated bool value".into()));
                }
                let b = data[offset] != 0;
                offset += 1;
                Ok((IndexableValue::Bool(b), offset))
            }
            2 => {
                if offset + 8 > data.len() {
                    return Err(GraphError::Corruption("truncated int value".into()));
                }
                let i = i64::from_le_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                    data[offset + 4],
                    data[offset + 5],
                    data[offset + 6],
                    data[offset + 7],
                ]);
                offset += 8;
                Ok((IndexableValue::Int(i), offset))
            }
            3 => {
                if offset + 4 > data.len() {
                    return Err(GraphError::Corruption("truncated string length".into()));
                }
                let str_len = u32::from_le_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ]) as usize;
                offset += 4;

                if offset + str_len > data.len() {
                    return Err(GraphError::Corruption("truncated string data".into()));
                }

                let s = String::from_utf8(data[offset..offset + str_len].to_vec())
                    .map_err(|_| GraphError::Corruption("invalid UTF-8 in string value".into()))?;
                offset += str_len;
                Ok((IndexableValue::String(s), offset))
            }
            _ => Err(GraphError::Corruption(format!(
                "invalid indexable value type {value_type}"
            ))),
        }
    }

    fn read_serialized_data(&mut self, root_page: PageId) -> Result<Vec<u8>> {
        let page_size = self.pager.page_size();
        // Page layout: [4 bytes chunk_len][4 bytes next_page][data]
        // The pager automatically reserves last 4 bytes for checksum
        // Max chunk size = (page_size - 4 checksum) - 8 (header) = page_size - 12
        let max_chunk_size = page_size - 12;
        let mut result = Vec::new();
        let mut current_page = root_page;

        let mut page_count = 0;

        loop {
            let mut chunk_len = 0u32;
            let mut next_page = 0u32;
            let mut chunk_data = Vec::new();

            self.pager.with_page(current_page, |page_data| {
                chunk_len =
                    u32::from_le_bytes([page_data[0], page_data[1], page_data[2], page_data[3]]);

                if chunk_len as usize > max_chunk_size {
                    return Err(GraphError::Corruption(
                        "invalid chunk length in property index page".into(),
                    ));
                }

                chunk_data.extend_from_slice(&page_data[8..8 + chunk_len as usize]);

                next_page =
                    u32::from_le_bytes([page_data[4], page_data[5], page_data[6], page_data[7]]);

                Ok(())
            })?;

            page_count += 1;

            result.extend_from_slice(&chunk_data);

            if next_page == 0 {
                break;
            }

            current_page = next_page;
        }

        debug!(
            pages_read = page_count,
            total_bytes = result.len(),
            "Read property index data"
        );

        Ok(result)
    }
}
