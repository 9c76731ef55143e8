//! Builders for test graphs and descriptors

use flowgraph_rs::types::{
    BlockDescriptor, CallDesc, ConnectionInfo, GraphBlockInfo, GraphSnapshot, ParamDesc, PortDesc,
};
use flowgraph_rs::ZoneConfig;

/// Builder for a simple block descriptor
pub struct DescriptorBuilder {
    descriptor: BlockDescriptor,
}

impl DescriptorBuilder {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Self {
            descriptor: BlockDescriptor {
                path,
                name,
                ..Default::default()
            },
        }
    }

    pub fn param(mut self, key: &str, default: &str) -> Self {
        self.descriptor.params.push(ParamDesc::new(key, default));
        self
    }

    pub fn arg(mut self, key: &str) -> Self {
        self.descriptor.args.push(key.to_string());
        self
    }

    pub fn setter(mut self, name: &str, key: &str) -> Self {
        self.descriptor.calls.push(CallDesc::setter(name, key));
        self
    }

    pub fn ports(mut self, inputs: usize, outputs: usize, dtype: &str) -> Self {
        for i in 0..inputs {
            self.descriptor
                .inputs
                .push(PortDesc::new(i.to_string(), dtype));
        }
        for i in 0..outputs {
            self.descriptor
                .outputs
                .push(PortDesc::new(i.to_string(), dtype));
        }
        self
    }

    pub fn build(self) -> BlockDescriptor {
        self.descriptor
    }
}

/// The standard test block: one constructor arg, one setter
pub fn gain_descriptor() -> BlockDescriptor {
    DescriptorBuilder::new("/blocks/gain")
        .param("dtype", "\"float32\"")
        .param("gain", "1.0")
        .arg("dtype")
        .setter("setGain", "gain")
        .ports(1, 1, "dtype")
        .build()
}

/// Builder for editor-side graph snapshots
#[derive(Default)]
pub struct SnapshotBuilder {
    snapshot: GraphSnapshot,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(mut self, id: &str, path: &str, zone: &str, props: &[(&str, &str)]) -> Self {
        self.snapshot.blocks.push(GraphBlockInfo {
            id: id.to_string(),
            path: path.to_string(),
            zone: zone.to_string(),
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self
    }

    pub fn gain_block(self, id: &str, zone: &str, gain: &str) -> Self {
        self.block(
            id,
            "/blocks/gain",
            zone,
            &[("dtype", "\"float32\""), ("gain", gain)],
        )
    }

    pub fn connect(mut self, src: &str, src_port: &str, dst: &str, dst_port: &str) -> Self {
        self.snapshot
            .connections
            .push(ConnectionInfo::new(src, src_port, dst, dst_port));
        self
    }

    pub fn zone(mut self, name: &str, config: ZoneConfig) -> Self {
        self.snapshot.zones.insert(name.to_string(), config);
        self
    }

    pub fn build(self) -> GraphSnapshot {
        self.snapshot
    }
}
