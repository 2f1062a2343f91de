use serde_json::{json, Value};

use crate::config::NetworkSettings;
use crate::template::{self, Export, Resource, Stack};

/// VPC with a public and a private subnet per availability zone.
pub struct Network {
    stack: Stack,
    cidr: String,
    vpc_id: Export,
    public_subnets: Vec<Export>,
    private_subnets: Vec<Export>,
}

impl Network {
    pub fn new(stack_name: &str, settings: &NetworkSettings) -> Result<Self, template::Error> {
        let mut stack = Stack::new(stack_name, "Jenkins on ECS: network");

        let vpc = stack.add(
            "Vpc",
            Resource::new(
                "AWS::EC2::VPC",
                json!({
                    "CidrBlock": settings.cidr,
                    "EnableDnsHostnames": true,
                    "EnableDnsSupport": true,
                    "InstanceTenancy": "default",
                    "Tags": template::name_tag(&format!("{}/Vpc", stack_name)),
                }),
            ),
        )?;
        let igw = stack.add(
            "VpcIGW",
            Resource::new("AWS::EC2::InternetGateway", json!({})),
        )?;
        stack.add(
            "VpcIGWAttachment",
            Resource::new(
                "AWS::EC2::VPCGatewayAttachment",
                json!({ "VpcId": vpc, "InternetGatewayId": igw }),
            ),
        )?;

        let azs = usize::from(settings.max_azs);
        let blocks = template::cidr(
            template::get_att("Vpc", "CidrBlock"),
            2 * azs,
            32 - settings.subnet_mask,
        );

        let mut public_subnets = vec![];
        let mut private_subnets = vec![];
        for index in 0..azs {
            let n = index + 1;
            let az = template::select(index, template::get_azs());

            let public_id = format!("PublicSubnet{}", n);
            let public = stack.add(
                &public_id,
                Resource::new(
                    "AWS::EC2::Subnet",
                    json!({
                        "VpcId": vpc,
                        "AvailabilityZone": az,
                        "CidrBlock": template::select(index, blocks.clone()),
                        "MapPublicIpOnLaunch": true,
                        "Tags": template::name_tag(&format!("{}/{}", stack_name, public_id)),
                    }),
                ),
            )?;
            let public_routes = add_route_table(&mut stack, &public_id, &vpc, &public)?;
            stack.add(
                &format!("{}DefaultRoute", public_id),
                Resource::new(
                    "AWS::EC2::Route",
                    json!({
                        "RouteTableId": public_routes,
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "GatewayId": igw,
                    }),
                )
                .depends_on("VpcIGWAttachment"),
            )?;

            let eip = format!("{}EIP", public_id);
            stack.add(&eip, Resource::new("AWS::EC2::EIP", json!({ "Domain": "vpc" })))?;
            let nat = stack.add(
                &format!("{}NATGateway", public_id),
                Resource::new(
                    "AWS::EC2::NatGateway",
                    json!({
                        "AllocationId": template::get_att(&eip, "AllocationId"),
                        "SubnetId": public,
                    }),
                ),
            )?;

            let private_id = format!("PrivateSubnet{}", n);
            let private = stack.add(
                &private_id,
                Resource::new(
                    "AWS::EC2::Subnet",
                    json!({
                        "VpcId": vpc,
                        "AvailabilityZone": az,
                        "CidrBlock": template::select(azs + index, blocks.clone()),
                        "MapPublicIpOnLaunch": false,
                        "Tags": template::name_tag(&format!("{}/{}", stack_name, private_id)),
                    }),
                ),
            )?;
            let private_routes = add_route_table(&mut stack, &private_id, &vpc, &private)?;
            stack.add(
                &format!("{}DefaultRoute", private_id),
                Resource::new(
                    "AWS::EC2::Route",
                    json!({
                        "RouteTableId": private_routes,
                        "DestinationCidrBlock": "0.0.0.0/0",
                        "NatGatewayId": nat,
                    }),
                ),
            )?;

            public_subnets.push(stack.export(
                &format!("{}Id", public_id),
                public,
                "Public subnet",
            )?);
            private_subnets.push(stack.export(
                &format!("{}Id", private_id),
                private,
                "Private subnet",
            )?);
        }

        let vpc_id = stack.export("VpcId", vpc, "Jenkins VPC")?;
        tracing::debug!(stack = stack_name, cidr = %settings.cidr, azs, "network synthesized");

        Ok(Self {
            stack,
            cidr: settings.cidr.clone(),
            vpc_id,
            public_subnets,
            private_subnets,
        })
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn into_stack(self) -> Stack {
        self.stack
    }

    pub fn stack_name(&self) -> &str {
        self.stack.name()
    }

    pub fn cidr(&self) -> &str {
        &self.cidr
    }

    pub fn vpc_id(&self) -> &Export {
        &self.vpc_id
    }

    pub fn public_subnets(&self) -> &[Export] {
        &self.public_subnets
    }

    pub fn private_subnets(&self) -> &[Export] {
        &self.private_subnets
    }
}

fn add_route_table(
    stack: &mut Stack,
    subnet_id: &str,
    vpc: &Value,
    subnet: &Value,
) -> Result<Value, template::Error> {
    let table = stack.add(
        &format!("{}RouteTable", subnet_id),
        Resource::new("AWS::EC2::RouteTable", json!({ "VpcId": vpc })),
    )?;
    stack.add(
        &format!("{}RouteTableAssociation", subnet_id),
        Resource::new(
            "AWS::EC2::SubnetRouteTableAssociation",
            json!({ "RouteTableId": table, "SubnetId": subnet }),
        ),
    )?;

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vpc_created_with_cidr() {
        let network = Network::new("MyTestStack", &NetworkSettings::default()).unwrap();

        let vpc = network.stack().resource("Vpc").unwrap();
        assert_eq!("AWS::EC2::VPC", vpc.resource_type);
        assert_eq!(Some(&json!("10.0.0.0/24")), vpc.property("CidrBlock"));
        assert_eq!("10.0.0.0/24", network.cidr());
    }

    #[test]
    fn cidr_is_passed_through_verbatim() {
        let settings = NetworkSettings {
            cidr: String::from("172.16.0.0/20"),
            max_azs: 3,
            subnet_mask: 24,
        };
        let network = Network::new("MyTestStack", &settings).unwrap();

        let vpc = network.stack().resource("Vpc").unwrap();
        assert_eq!(Some(&json!("172.16.0.0/20")), vpc.property("CidrBlock"));
    }

    #[test]
    fn one_public_and_one_private_subnet_per_az() {
        let network = Network::new("MyTestStack", &NetworkSettings::default()).unwrap();

        assert_eq!(4, network.stack().resources_of_type("AWS::EC2::Subnet").count());
        assert_eq!(2, network.stack().resources_of_type("AWS::EC2::NatGateway").count());
        assert_eq!(
            vec!["MyTestStack:PrivateSubnet1Id", "MyTestStack:PrivateSubnet2Id"],
            network
                .private_subnets()
                .iter()
                .map(|export| export.name())
                .collect::<Vec<_>>()
        );

        let private = network.stack().resource("PrivateSubnet2").unwrap();
        assert_eq!(
            Some(&json!({
                "Fn::Select": [3, {
                    "Fn::Cidr": [{ "Fn::GetAtt": ["Vpc", "CidrBlock"] }, 4, 6]
                }]
            })),
            private.property("CidrBlock")
        );
    }

    #[test]
    fn private_subnets_route_through_nat() {
        let network = Network::new("MyTestStack", &NetworkSettings::default()).unwrap();

        let route = network.stack().resource("PrivateSubnet1DefaultRoute").unwrap();
        assert_eq!(
            Some(&json!({ "Ref": "PublicSubnet1NATGateway" })),
            route.property("NatGatewayId")
        );
    }
}
