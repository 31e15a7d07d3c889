//! Tests for the network provisioner.

use super::*;
use crate::context::InstallationContext;
use crate::state::StateStore;
use crate::tag::InstallationTag;
use crate::test_support::ScriptedCloud;
use crate::wait::WaitPolicy;
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    _tmp: TempDir,
    context: InstallationContext,
    cloud: ScriptedCloud,
    settings: NetworkSettings,
    waiter: Waiter,
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().expect("tempdir");
    let path = Utf8PathBuf::from_path_buf(tmp.path().join("demo")).expect("utf8 path");
    let tag = InstallationTag::new("demo").expect("tag");
    let store = StateStore::open(&path, &tag).expect("store");
    let cloud = ScriptedCloud::new();
    script_network(&cloud);
    Harness {
        _tmp: tmp,
        context: InstallationContext::new("eu-west-1", store),
        cloud,
        settings: NetworkSettings {
            vpc_cidr: "10.0.0.0/16".parse().expect("cidr"),
            internal_supernet: "172.16.0.0/12".parse().expect("cidr"),
            max_zones: 3,
            public_subnets_per_zone: 1,
            private_subnets_per_zone: 1,
        },
        waiter: Waiter::new(WaitPolicy::from_secs(5, 600), CancellationToken::new()),
    }
}

/// Scripts a cloud that creates each resource once.
fn script_network(cloud: &ScriptedCloud) {
    cloud.respond(
        "describe-availability-zones",
        json!({"AvailabilityZones": [
            {"ZoneName": "eu-west-1a"},
            {"ZoneName": "eu-west-1b"},
            {"ZoneName": "eu-west-1c"},
        ]}),
    );
    cloud.push("create-vpc", json!({"Vpc": {"VpcId": "vpc-1"}}));
    cloud.respond("modify-vpc-attribute", Value::Null);
    cloud.respond("modify-subnet-attribute", Value::Null);
    for index in 1..=6 {
        cloud.push(
            "create-subnet",
            json!({"Subnet": {"SubnetId": format!("subnet-{index}")}}),
        );
    }
    cloud.push(
        "create-internet-gateway",
        json!({"InternetGateway": {"InternetGatewayId": "igw-1"}}),
    );
    cloud.push("attach-internet-gateway", Value::Null);
    cloud.push(
        "allocate-address",
        json!({"AllocationId": "eipalloc-1", "PublicIp": "198.51.100.7"}),
    );
    cloud.push(
        "create-nat-gateway",
        json!({"NatGateway": {"NatGatewayId": "nat-1", "State": "pending"}}),
    );
    cloud.push(
        "describe-nat-gateways",
        json!({"NatGateways": [{"State": "pending"}]}),
    );
    cloud.respond(
        "describe-nat-gateways",
        json!({"NatGateways": [{"State": "available"}]}),
    );
    cloud.push(
        "create-transit-gateway",
        json!({"TransitGateway": {"TransitGatewayId": "tgw-1", "State": "pending"}}),
    );
    cloud.push(
        "describe-transit-gateways",
        json!({"TransitGateways": [{"State": "pending"}]}),
    );
    cloud.push(
        "describe-transit-gateways",
        json!({"TransitGateways": [{"State": "pending"}]}),
    );
    cloud.respond(
        "describe-transit-gateways",
        json!({"TransitGateways": [{"State": "available"}]}),
    );
    cloud.push(
        "create-transit-gateway-vpc-attachment",
        json!({"TransitGatewayVpcAttachment": {"TransitGatewayAttachmentId": "tgw-attach-1"}}),
    );
    cloud.respond(
        "describe-transit-gateway-vpc-attachments",
        json!({"TransitGatewayVpcAttachments": [{"State": "available"}]}),
    );
    cloud.push(
        "create-route-table",
        json!({"RouteTable": {"RouteTableId": "rtb-public"}}),
    );
    cloud.push(
        "create-route-table",
        json!({"RouteTable": {"RouteTableId": "rtb-private"}}),
    );
    cloud.respond("create-route", json!({"Return": true}));
    for index in 1..=6 {
        cloud.push(
            "associate-route-table",
            json!({"AssociationId": format!("rtbassoc-{index}")}),
        );
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn apply_builds_the_full_network(harness: Harness) {
    let provisioner = Provisioner::new(&harness.cloud, &harness.context);
    let network = NetworkProvisioner::new(&provisioner, &harness.settings, &harness.waiter);

    let ids = network.apply().await.expect("network should build");

    assert_eq!(ids.vpc_id, "vpc-1");
    assert_eq!(ids.public_subnet_ids, vec!["subnet-1", "subnet-3", "subnet-5"]);
    assert_eq!(ids.private_subnet_ids, vec!["subnet-2", "subnet-4", "subnet-6"]);
    assert_eq!(ids.jumpbox_subnet_id, "subnet-1");
    assert_eq!(ids.nat_gateway_id, "nat-1");
    assert_eq!(ids.transit_gateway_id, "tgw-1");
    assert_eq!(ids.transit_gateway_attachment_id, "tgw-attach-1");

    assert_eq!(harness.cloud.calls_to("create-nat-gateway").len(), 1);
    let nat = &harness.cloud.calls_to("create-nat-gateway")[0];
    assert_eq!(nat.value_of("subnet-id"), Some("subnet-1"));
    assert_eq!(harness.cloud.calls_to("describe-transit-gateways").len(), 3);

    let attachment = &harness.cloud.calls_to("create-transit-gateway-vpc-attachment")[0];
    let args = attachment.args().join(" ");
    assert!(
        args.contains("--subnet-ids subnet-2 subnet-4 subnet-6"),
        "attachment should span private subnets: {args}"
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn apply_twice_performs_no_creation_on_second_run(harness: Harness) {
    let provisioner = Provisioner::new(&harness.cloud, &harness.context);
    let network = NetworkProvisioner::new(&provisioner, &harness.settings, &harness.waiter);

    let first = network.apply().await.expect("first run");
    harness.cloud.clear_calls();
    let second = network.apply().await.expect("second run");

    assert_eq!(first, second);
    assert_eq!(harness.cloud.creation_count(), 0);
    assert!(
        harness.cloud.calls_to("describe-availability-zones").is_empty(),
        "zone list should come from the cached record"
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn routes_target_the_planned_gateways(harness: Harness) {
    let provisioner = Provisioner::new(&harness.cloud, &harness.context);
    let network = NetworkProvisioner::new(&provisioner, &harness.settings, &harness.waiter);

    network.apply().await.expect("network should build");

    let routes = harness.cloud.calls_to("create-route");
    let described: Vec<(Option<&str>, Option<&str>, String)> = routes
        .iter()
        .map(|call| {
            let target = call
                .args()
                .iter()
                .find(|arg| arg.ends_with("gateway-id"))
                .cloned()
                .unwrap_or_default();
            (
                call.value_of("route-table-id"),
                call.value_of("destination-cidr-block"),
                target,
            )
        })
        .collect();
    assert_eq!(
        described,
        vec![
            (Some("rtb-public"), Some("0.0.0.0/0"), String::from("--gateway-id")),
            (
                Some("rtb-public"),
                Some("172.16.0.0/12"),
                String::from("--transit-gateway-id")
            ),
            (
                Some("rtb-private"),
                Some("0.0.0.0/0"),
                String::from("--nat-gateway-id")
            ),
            (
                Some("rtb-private"),
                Some("172.16.0.0/12"),
                String::from("--transit-gateway-id")
            ),
        ]
    );
    assert_eq!(harness.cloud.calls_to("associate-route-table").len(), 6);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn duplicate_route_is_recorded_anyway(harness: Harness) {
    harness.cloud.push_error("create-route", "RouteAlreadyExists");
    let provisioner = Provisioner::new(&harness.cloud, &harness.context);
    let network = NetworkProvisioner::new(&provisioner, &harness.settings, &harness.waiter);

    network.apply().await.expect("duplicate route is tolerated");

    let record = harness
        .context
        .store()
        .require(&ResourceKey::new(ResourceKind::Route, "public-default"))
        .expect("route record");
    assert_eq!(record.lookup("RouteTableId").expect("table"), "rtb-public");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn failure_midway_keeps_earlier_records(harness: Harness) {
    let failing = ScriptedCloud::new();
    failing.respond(
        "describe-availability-zones",
        json!({"AvailabilityZones": [{"ZoneName": "eu-west-1a"}]}),
    );
    failing.push("create-vpc", json!({"Vpc": {"VpcId": "vpc-1"}}));
    failing.respond("modify-vpc-attribute", Value::Null);
    failing.push_error("create-subnet", "InsufficientFreeAddressesInSubnet");
    let provisioner = Provisioner::new(&failing, &harness.context);
    let network = NetworkProvisioner::new(&provisioner, &harness.settings, &harness.waiter);

    let err = network.apply().await.expect_err("subnet creation fails");

    assert!(matches!(err, NetworkError::Provision(ProvisionError::Cloud { .. })));
    assert!(
        harness
            .context
            .store()
            .contains(&ResourceKey::new(ResourceKind::Vpc, MAIN))
            .expect("contains")
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn transit_attachment_takes_one_private_subnet_per_zone(mut harness: Harness) {
    harness.settings.max_zones = 2;
    harness.settings.private_subnets_per_zone = 2;
    let provisioner = Provisioner::new(&harness.cloud, &harness.context);
    let network = NetworkProvisioner::new(&provisioner, &harness.settings, &harness.waiter);

    let ids = network.apply().await.expect("network should build");

    assert_eq!(
        ids.private_subnet_ids,
        vec!["subnet-2", "subnet-3", "subnet-5", "subnet-6"]
    );
    assert_eq!(ids.attachment_subnet_ids, vec!["subnet-2", "subnet-5"]);
    let attachments = harness.cloud.calls_to("create-transit-gateway-vpc-attachment");
    assert_eq!(attachments.len(), 1);
    let args = attachments[0].args().join(" ");
    assert!(
        args.contains("--subnet-ids subnet-2 subnet-5 --"),
        "attachment should name the first private subnet of each zone: {args}"
    );
}
