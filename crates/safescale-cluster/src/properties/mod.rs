//! Versioned cluster properties.
//!
//! Each property tag maps to a value-type record with `Clone` and serde
//! both ways; newer versions migrate lazily from the older ones on first
//! read (see `safescale_store::PropertyBag::get_or_migrate`).

pub mod v1;
pub mod v2;

pub use v1::{DefaultsV1, FeaturesV1, NetworkV1, SizingV1, StateV1};
pub use v2::{DefaultsV2, NetworkV2, Node, NodesV2, SizingRequirements};

/// Map defaults from v1 to v2: sizing fields become `min_*` requirements.
#[must_use]
pub fn defaults_v1_to_v2(old: &DefaultsV1) -> DefaultsV2 {
    DefaultsV2 {
        image: old.image.clone(),
        master_sizing: sizing_v1_to_requirements(&old.master_sizing),
        node_sizing: sizing_v1_to_requirements(&old.node_sizing),
        ..DefaultsV2::default()
    }
}

fn sizing_v1_to_requirements(old: &SizingV1) -> SizingRequirements {
    SizingRequirements {
        min_cores: old.cores,
        min_cpu_freq: old.cpu_freq,
        min_gpu: old.gpu_number,
        min_ram_size: old.ram_size,
        min_disk_size: old.disk_size,
        replaceable: old.replaceable,
    }
}

/// Map network config from v1 to v2: the gateway IP becomes the default
/// route, the public IP becomes the endpoint.
#[must_use]
pub fn network_v1_to_v2(old: &NetworkV1) -> NetworkV2 {
    NetworkV2 {
        network_id: old.network_id.clone(),
        cidr: old.cidr.clone(),
        gateway_id: old.gateway_id.clone(),
        gateway_ip: old.gateway_ip.clone(),
        default_route_ip: old.gateway_ip.clone(),
        endpoint_ip: old.public_ip.clone(),
        ..NetworkV2::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_store::{Property, PropertyBag};

    #[test]
    fn defaults_migration_renames_sizing_fields() {
        let mut bag = PropertyBag::new();
        bag.set(&DefaultsV1 {
            image: "Ubuntu 20.04".into(),
            master_sizing: SizingV1 {
                cores: 4,
                ram_size: 15.0,
                disk_size: 100,
                ..SizingV1::default()
            },
            node_sizing: SizingV1 {
                cores: 8,
                ram_size: 30.0,
                disk_size: 200,
                ..SizingV1::default()
            },
        })
        .unwrap();

        assert!(!bag.lookup(DefaultsV2::TAG));
        let v2 = bag
            .get_or_migrate::<DefaultsV2, DefaultsV1>(defaults_v1_to_v2)
            .unwrap();
        assert_eq!(v2.image, "Ubuntu 20.04");
        assert_eq!(v2.master_sizing.min_cores, 4);
        assert_eq!(v2.node_sizing.min_disk_size, 200);

        // Second read is direct, the legacy record remains.
        assert!(bag.lookup(DefaultsV2::TAG));
        assert!(bag.lookup(DefaultsV1::TAG));
        let direct = bag
            .get_or_migrate::<DefaultsV2, DefaultsV1>(|_| panic!("must not migrate twice"))
            .unwrap();
        assert_eq!(direct, v2);
    }

    #[test]
    fn network_migration_fills_route_and_endpoint() {
        let old = NetworkV1 {
            network_id: "net-1".into(),
            cidr: "10.0.0.0/16".into(),
            gateway_id: "gw-1".into(),
            gateway_ip: "10.0.0.1".into(),
            public_ip: "203.0.113.9".into(),
        };
        let new = network_v1_to_v2(&old);
        assert_eq!(new.default_route_ip, "10.0.0.1");
        assert_eq!(new.endpoint_ip, "203.0.113.9");
        assert!(new.secondary_gateway_id.is_empty());
    }
}
