//! Hickory DNS authority backed by the cluster index.
//!
//! | resolution       | answer                                  |
//! |------------------|-----------------------------------------|
//! | `Addresses`      | A/AAAA records of the requested family  |
//! | `PendingAddress` | NOERROR, no records                     |
//! | `NotFound`       | NXDOMAIN (NOERROR at the apex)          |
//! | `NotReady`       | SERVFAIL                                |

use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, AAAA, NS, SOA};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordSet, RecordType};
use hickory_server::authority::{
    Authority, LookupControlFlow, LookupError, LookupOptions, LookupRecords, MessageRequest,
    UpdateResult, ZoneType,
};
use hickory_server::server::RequestInfo;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::config::DnsConfig;
use crate::error::DnsError;
use crate::index::ClusterIndex;
use crate::metrics::{self, QueryResult, Timer};
use crate::resolver::{Resolution, Resolver};
use crate::zones;

/// Authority for one configured zone.
pub struct KubeAuthority {
    origin: LowerName,
    zone: String,
    resolver: Resolver,
    index: ClusterIndex,
    config: Arc<DnsConfig>,
}

impl KubeAuthority {
    /// Create an authority for `zone`.
    pub fn new(
        zone: &str,
        config: Arc<DnsConfig>,
        resolver: Resolver,
        index: ClusterIndex,
    ) -> Result<Self, hickory_proto::ProtoError> {
        let zone = zones::normalize(zone);
        let origin = Name::from_ascii(&zone)?.into();

        Ok(Self {
            origin,
            zone,
            resolver,
            index,
            config,
        })
    }

    /// Build address records of type `rtype` from the resolved addresses.
    /// Addresses of the other family, and hostnames, are skipped.
    fn build_address_records(
        &self,
        name: Name,
        rtype: RecordType,
        addresses: &[String],
    ) -> RecordSet {
        let mut record_set = RecordSet::new(name.clone(), rtype, 0);

        for address in addresses {
            let rdata = match rtype {
                RecordType::A => address.parse::<Ipv4Addr>().ok().map(|ip| RData::A(A::from(ip))),
                RecordType::AAAA => address
                    .parse::<Ipv6Addr>()
                    .ok()
                    .map(|ip| RData::AAAA(AAAA::from(ip))),
                _ => None,
            };
            let Some(rdata) = rdata else {
                trace!(%address, ?rtype, "skipping address of another type");
                continue;
            };
            let mut record = Record::from_rdata(name.clone(), self.config.ttl, rdata);
            record.set_dns_class(DNSClass::IN);
            record_set.insert(record, 0);
        }

        record_set
    }

    /// Build the SOA record for this zone.
    fn build_soa_record(&self) -> RecordSet {
        let soa = SOA::new(
            Name::from_ascii(&self.config.soa.mname).unwrap_or_else(|_| Name::root()),
            Name::from_ascii(&self.config.soa.rname).unwrap_or_else(|_| Name::root()),
            self.index.serial(),
            self.config.soa.refresh as i32,
            self.config.soa.retry as i32,
            self.config.soa.expire as i32,
            self.config.soa.minimum,
        );

        let name = Name::from(self.origin.clone());
        let mut record_set = RecordSet::new(name.clone(), RecordType::SOA, 0);
        let mut record = Record::from_rdata(name, self.config.ttl, RData::SOA(soa));
        record.set_dns_class(DNSClass::IN);
        record_set.insert(record, 0);

        record_set
    }

    /// Build an NS record for this zone.
    fn build_ns_record(&self) -> RecordSet {
        let name = Name::from(self.origin.clone());
        let ns_name = Name::from_ascii(&self.config.soa.mname).unwrap_or_else(|_| Name::root());

        let mut record_set = RecordSet::new(name.clone(), RecordType::NS, 0);
        let mut record = Record::from_rdata(name, self.config.ttl, RData::NS(NS(ns_name)));
        record.set_dns_class(DNSClass::IN);
        record_set.insert(record, 0);

        record_set
    }

    fn no_data() -> LookupControlFlow<LookupRecords> {
        LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NoError)))
    }

    /// Answer an A or AAAA query.
    fn lookup_address(
        &self,
        name: &LowerName,
        rtype: RecordType,
        resolution: Resolution,
        lookup_options: LookupOptions,
        timer: Timer,
    ) -> LookupControlFlow<LookupRecords> {
        let rtype_str = rtype.to_string();

        match resolution {
            Resolution::NotReady => {
                debug!("Sync gate not open, returning SERVFAIL");
                metrics::record_query(&rtype_str, QueryResult::NotReady, timer.elapsed());
                LookupControlFlow::Break(Err(LookupError::from(io::Error::new(
                    io::ErrorKind::NotConnected,
                    DnsError::NotReady,
                ))))
            }
            Resolution::NotFound if *name == self.origin => {
                debug!(%name, "apex has no address records");
                metrics::record_query(&rtype_str, QueryResult::NoData, timer.elapsed());
                Self::no_data()
            }
            Resolution::NotFound => {
                debug!(%name, ?rtype, "lookup: no records found");
                metrics::record_query(&rtype_str, QueryResult::NxDomain, timer.elapsed());
                LookupControlFlow::Break(Err(LookupError::ResponseCode(ResponseCode::NXDomain)))
            }
            Resolution::PendingAddress => {
                debug!(%name, ?rtype, "lookup: no address published yet");
                metrics::record_query(&rtype_str, QueryResult::NoData, timer.elapsed());
                Self::no_data()
            }
            Resolution::Addresses(addresses) => {
                let record_set =
                    self.build_address_records(Name::from(name.clone()), rtype, &addresses);
                let count = record_set.records_without_rrsigs().count();
                if count == 0 {
                    debug!(%name, ?rtype, "lookup: no addresses of requested type");
                    metrics::record_query(&rtype_str, QueryResult::NoData, timer.elapsed());
                    return Self::no_data();
                }

                debug!(%name, ?rtype, count, "lookup: returning records");
                metrics::record_addresses_returned(count);
                metrics::record_query(&rtype_str, QueryResult::Success, timer.elapsed());
                LookupControlFlow::Break(Ok(LookupRecords::new(
                    lookup_options,
                    Arc::new(record_set),
                )))
            }
        }
    }
}

#[async_trait]
impl Authority for KubeAuthority {
    type Lookup = LookupRecords;

    fn zone_type(&self) -> ZoneType {
        ZoneType::Primary
    }

    fn is_axfr_allowed(&self) -> bool {
        false
    }

    fn origin(&self) -> &LowerName {
        &self.origin
    }

    async fn lookup(
        &self,
        name: &LowerName,
        rtype: RecordType,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        let timer = Timer::start();
        let rtype_str = rtype.to_string();
        let name_str = name.to_string();

        trace!(name = %name_str, rtype = ?rtype, "DNS lookup");

        if let Some(resolution) = self.resolver.resolve(&name_str, &self.zone, rtype) {
            return self.lookup_address(name, rtype, resolution, lookup_options, timer);
        }

        match rtype {
            RecordType::SOA if *name == self.origin => {
                debug!(name = %name_str, "SOA lookup");
                metrics::record_query(&rtype_str, QueryResult::Success, timer.elapsed());
                let record_set = Arc::new(self.build_soa_record());
                LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, record_set)))
            }
            RecordType::NS if *name == self.origin => {
                debug!(name = %name_str, "NS lookup");
                metrics::record_query(&rtype_str, QueryResult::Success, timer.elapsed());
                let record_set = Arc::new(self.build_ns_record());
                LookupControlFlow::Break(Ok(LookupRecords::new(lookup_options, record_set)))
            }
            _ => {
                trace!(name = %name_str, rtype = ?rtype, "Unsupported record type");
                metrics::record_query(&rtype_str, QueryResult::NoData, timer.elapsed());
                Self::no_data()
            }
        }
    }

    async fn search(
        &self,
        request_info: RequestInfo<'_>,
        lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        self.lookup(
            request_info.query.name(),
            request_info.query.query_type(),
            lookup_options,
        )
        .await
    }

    async fn get_nsec_records(
        &self,
        _name: &LowerName,
        _lookup_options: LookupOptions,
    ) -> LookupControlFlow<Self::Lookup> {
        // DNSSEC not supported
        Self::no_data()
    }

    async fn update(&self, _update: &MessageRequest) -> UpdateResult<bool> {
        // Dynamic updates not supported
        Err(ResponseCode::NotImp)
    }
}
