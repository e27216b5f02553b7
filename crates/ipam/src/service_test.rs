//! Unit tests for the IPAM service

#[cfg(test)]
mod tests {
    use crate::error::IpamError;
    use crate::layout::{DatacenterLayout, LayoutSpec};
    use crate::mock::MemoryEndpointStore;
    use crate::models::{AllocationRequest, AllocationSource, EndpointRecord, Triple};
    use crate::service::IpamService;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn layout(host: u8, tenant: u8, segment: u8, space: u8, stride: u8) -> DatacenterLayout {
        DatacenterLayout::new(LayoutSpec {
            cidr: "10.0.0.0/8".parse().unwrap(),
            host_bits: host,
            tenant_bits: tenant,
            segment_bits: segment,
            endpoint_space_bits: space,
            endpoint_bits: stride,
        })
        .unwrap()
    }

    /// 10.0.0.0/8, host 8, tenant 4, segment 4, endpoint space 0, stride 8
    fn reference_layout() -> DatacenterLayout {
        layout(8, 4, 4, 0, 8)
    }

    /// Stride 0: consecutive endpoints get consecutive addresses
    fn dense_layout() -> DatacenterLayout {
        layout(8, 4, 4, 8, 0)
    }

    fn service(store: &MemoryEndpointStore, layout: DatacenterLayout) -> IpamService {
        IpamService::new(Arc::new(store.clone()), layout)
    }

    fn request(tenant: u64, segment: u64, host: u64) -> AllocationRequest {
        AllocationRequest::new(Triple::new(tenant, segment, host))
    }

    fn seeded_record(id: u64, address: Ipv4Addr, network_id: u64) -> EndpointRecord {
        EndpointRecord {
            id,
            address,
            tenant_id: 1,
            segment_id: 1,
            host_id: 1,
            network_id,
            stride: 0,
            in_use: true,
            request_token: None,
            name: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_first_allocation_uses_offset_three() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, reference_layout());

        let endpoint = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        assert_eq!(endpoint.network_id, 0);
        assert_eq!(endpoint.effective_network_id().unwrap(), 3);
        assert_eq!(endpoint.address, Ipv4Addr::new(10, 1, 17, 3));
        assert!(endpoint.in_use);
    }

    #[tokio::test]
    async fn test_second_allocation_strides_by_256() {
        // Same widths as the reference layout but with two bits moved from
        // the segment field to the endpoint region, so 259 fits
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, layout(8, 4, 2, 2, 8));

        let first = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        let second = ipam.allocate(&request(1, 1, 1)).await.unwrap();

        assert_eq!(first.network_id, 0);
        assert_eq!(first.effective_network_id().unwrap(), 3);
        assert_eq!(first.address, Ipv4Addr::new(10, 1, 20, 3));

        assert_eq!(second.network_id, 1);
        assert_eq!(second.effective_network_id().unwrap(), 259);
        assert_eq!(second.address, Ipv4Addr::new(10, 1, 21, 3));
    }

    #[tokio::test]
    async fn test_exhausted_endpoint_region_fails_without_side_effects() {
        // In the reference layout the endpoint region is 8 bits wide, so
        // network ID 1 (offset 259) would spill into the segment field
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, reference_layout());

        ipam.allocate(&request(1, 1, 1)).await.unwrap();
        let err = ipam.allocate(&request(1, 1, 1)).await.unwrap_err();
        assert!(matches!(err, IpamError::ConfigurationFault(_)), "got {:?}", err);

        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_release_then_allocate_returns_same_address() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, reference_layout());

        let first = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        let released = ipam.release(first.address).await.unwrap();
        assert_eq!(released.address, first.address);
        assert!(released.in_use, "release returns the record's former state");

        let again = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        assert_eq!(again.address, first.address);
        assert_eq!(again.network_id, first.network_id);
        assert_eq!(again.id, first.id);
        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_lowest_released_network_id_is_reused_first() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, dense_layout());

        let mut addresses = Vec::new();
        for expected in 0..4u64 {
            let endpoint = ipam.allocate(&request(1, 1, 1)).await.unwrap();
            assert_eq!(endpoint.network_id, expected);
            addresses.push(endpoint.address);
        }

        ipam.release(addresses[2]).await.unwrap();
        ipam.release(addresses[0]).await.unwrap();

        let a = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        let b = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        let c = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        assert_eq!((a.network_id, a.address), (0, addresses[0]));
        assert_eq!((b.network_id, b.address), (2, addresses[2]));
        // Nothing left to reclaim, so a fresh ID is minted after the max
        assert_eq!(c.network_id, 4);
        assert_eq!(c.address, Ipv4Addr::new(10, 1, 17, 7));
    }

    #[tokio::test]
    async fn test_network_ids_are_scoped_per_triple() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, dense_layout());

        let a = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        let b = ipam.allocate(&request(2, 1, 1)).await.unwrap();
        let c = ipam.allocate(&request(1, 2, 1)).await.unwrap();
        let d = ipam.allocate(&request(1, 1, 2)).await.unwrap();

        for endpoint in [&a, &b, &c, &d] {
            assert_eq!(endpoint.network_id, 0);
        }
        let unique: HashSet<Ipv4Addr> = [a.address, b.address, c.address, d.address].into_iter().collect();
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn test_release_unknown_address_is_not_found() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, reference_layout());

        let err = ipam.release(Ipv4Addr::new(10, 1, 17, 3)).await.unwrap_err();
        assert!(matches!(err, IpamError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_double_release_is_not_found() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, reference_layout());

        let endpoint = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        ipam.release(endpoint.address).await.unwrap();

        let err = ipam.release(endpoint.address).await.unwrap_err();
        assert!(matches!(err, IpamError::NotFound(_)));

        // History is kept, only deactivated
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].in_use);
    }

    #[tokio::test]
    async fn test_duplicate_active_records_surface_consistency_fault() {
        let store = MemoryEndpointStore::new();
        let address = Ipv4Addr::new(10, 1, 17, 3);
        store.seed(seeded_record(1, address, 0)).await;
        store.seed(seeded_record(2, address, 1)).await;
        let ipam = service(&store, dense_layout());

        let err = ipam.release(address).await.unwrap_err();
        assert!(matches!(err, IpamError::ConsistencyFault(_)), "got {:?}", err);

        let err = ipam.lookup(address).await.unwrap_err();
        assert!(matches!(err, IpamError::ConsistencyFault(_)));

        // Neither record was touched
        assert!(store.records().await.iter().all(|r| r.in_use));
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, dense_layout());

        store.fail_next_commit().await;
        let err = ipam.allocate(&request(1, 1, 1)).await.unwrap_err();
        assert!(matches!(err, IpamError::StoreFault(_)), "got {:?}", err);
        assert!(store.records().await.is_empty());

        // The mutex was released and the failed attempt left no trace
        let endpoint = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        assert_eq!(endpoint.network_id, 0);
    }

    #[tokio::test]
    async fn test_failed_release_commit_keeps_address_active() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, dense_layout());
        let endpoint = ipam.allocate(&request(1, 1, 1)).await.unwrap();

        store.fail_next_commit().await;
        assert!(ipam.release(endpoint.address).await.is_err());
        assert!(ipam.lookup(endpoint.address).await.unwrap().in_use);
    }

    #[tokio::test]
    async fn test_request_token_replay_returns_existing_allocation() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, dense_layout());

        let req = request(1, 1, 1).with_name("web-0").with_token("req-42");
        let first = ipam.allocate(&req).await.unwrap();
        let replay = ipam.allocate(&req).await.unwrap();

        assert_eq!(first, replay);
        assert_eq!(store.records().await.len(), 1);
        assert_eq!(first.name, "web-0");
        assert_eq!(first.request_token.as_deref(), Some("req-42"));
    }

    #[tokio::test]
    async fn test_request_token_on_other_triple_conflicts() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, dense_layout());

        ipam.allocate(&request(1, 1, 1).with_token("req-42")).await.unwrap();
        let err = ipam
            .allocate(&request(2, 1, 1).with_token("req-42"))
            .await
            .unwrap_err();
        assert!(matches!(err, IpamError::ConflictViolation(_)));
        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_release_clears_request_token() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, dense_layout());

        let first = ipam.allocate(&request(1, 1, 1).with_token("req-42")).await.unwrap();
        ipam.release(first.address).await.unwrap();
        assert_eq!(store.records().await[0].request_token, None);

        // The token is free again and the released slot goes to the new holder
        let second = ipam
            .allocate(&request(1, 1, 1).with_name("web-1").with_token("req-42"))
            .await
            .unwrap();
        assert_eq!(second.address, first.address);
        assert_eq!(second.name, "web-1");
    }

    #[tokio::test]
    async fn test_changed_stride_is_rejected_for_existing_history() {
        let store = MemoryEndpointStore::new();
        let old = service(&store, layout(8, 4, 4, 4, 2));
        let new = service(&store, layout(8, 4, 4, 4, 3));

        let endpoint = old.allocate(&request(1, 1, 1)).await.unwrap();
        let err = new.allocate(&request(1, 1, 1)).await.unwrap_err();
        assert!(matches!(err, IpamError::ConfigurationFault(_)), "got {:?}", err);

        // A triple without history is fine under the new stride
        let other = new.allocate(&request(2, 1, 1)).await.unwrap();
        assert_eq!(other.stride, 3);

        // Reclaim honors the address as it was originally encoded
        old.release(endpoint.address).await.unwrap();
        let reclaimed = new.allocate(&request(1, 1, 1)).await.unwrap();
        assert_eq!(reclaimed.address, endpoint.address);
        assert_eq!(reclaimed.stride, 2);
    }

    #[tokio::test]
    async fn test_identifier_wider_than_field_is_invalid() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, reference_layout());

        let err = ipam.allocate(&request(16, 1, 1)).await.unwrap_err();
        assert!(matches!(err, IpamError::InvalidRequest(_)));
        assert!(store.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_allocated_address_decomposes_to_its_origin() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, layout(6, 4, 4, 6, 2));

        for triple in [Triple::new(3, 7, 12), Triple::new(15, 0, 63)] {
            for _ in 0..3 {
                let endpoint = ipam.allocate(&AllocationRequest::new(triple)).await.unwrap();
                let (decoded, network_id) = ipam.layout().decompose(endpoint.address).unwrap();
                assert_eq!(decoded, triple);
                assert_eq!(network_id, endpoint.network_id);
            }
        }
    }

    #[tokio::test]
    async fn test_lookup_and_history() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, dense_layout());

        let a = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        let b = ipam.allocate(&request(1, 1, 1)).await.unwrap();
        ipam.release(a.address).await.unwrap();

        assert!(matches!(ipam.lookup(a.address).await, Err(IpamError::NotFound(_))));
        assert_eq!(ipam.lookup(b.address).await.unwrap().id, b.id);

        let history = ipam.endpoints(&Triple::new(1, 1, 1)).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].network_id, 0);
        assert!(!history[0].in_use);
        assert!(history[1].in_use);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_never_share_an_address() {
        let store = MemoryEndpointStore::new();
        let ipam = Arc::new(service(&store, dense_layout()));

        let mut handles = Vec::new();
        for i in 0..48u64 {
            let ipam = Arc::clone(&ipam);
            handles.push(tokio::spawn(async move {
                ipam.allocate(&request(1 + i % 3, 1, 1)).await
            }));
        }

        let mut addresses = HashSet::new();
        let mut per_triple: std::collections::HashMap<Triple, Vec<u64>> = Default::default();
        for handle in futures::future::join_all(handles).await {
            let endpoint = handle.unwrap().unwrap();
            assert!(addresses.insert(endpoint.address), "duplicate {}", endpoint.address);
            per_triple.entry(endpoint.triple()).or_default().push(endpoint.network_id);
        }

        // Gap-free 0..16 for each of the three triples
        for (_, mut ids) in per_triple {
            ids.sort_unstable();
            assert_eq!(ids, (0..16).collect::<Vec<u64>>());
        }
    }

    #[tokio::test]
    async fn test_address_outside_cidr_is_invalid_request() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, reference_layout());
        let outside = Ipv4Addr::new(192, 168, 1, 3);

        assert!(matches!(ipam.release(outside).await, Err(IpamError::InvalidRequest(_))));
        assert!(matches!(ipam.lookup(outside).await, Err(IpamError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_allocation_source() {
        let store = MemoryEndpointStore::new();
        let ipam = service(&store, dense_layout());
        let req = request(1, 1, 1).with_token("a1");

        let (first, source) = ipam.allocate_with_source(&req).await.unwrap();
        assert_eq!(source, AllocationSource::Minted);

        let (replay, source) = ipam.allocate_with_source(&req).await.unwrap();
        assert_eq!(source, AllocationSource::Replayed);
        assert_eq!(replay.id, first.id);

        ipam.release(first.address).await.unwrap();
        let (reclaimed, source) = ipam.allocate_with_source(&request(1, 1, 1)).await.unwrap();
        assert_eq!(source, AllocationSource::Reclaimed);
        assert_eq!(reclaimed.address, first.address);
    }
}
