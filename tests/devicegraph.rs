use blkgraph::*;
use pretty_assertions::assert_eq;

fn md_names_sorted(names: &[&str]) -> Vec<String> {
    let mut graph = Devicegraph::new();
    for name in names {
        graph.create_md(name).unwrap();
    }

    let mut mds = graph.mds();
    mds.sort_by(|a, b| Md::compare_by_name(a, b));
    mds.iter().map(|md| md.blk.name.clone()).collect()
}

#[test]
fn mds_sort_named_before_numeric() {
    let sorted = md_names_sorted(&[
        "/dev/md10", "/dev/md/foo", "/dev/md1", "/dev/md0", "/dev/md/bar", "/dev/md2", "/dev/md/3",
    ]);

    assert_eq!(
        sorted,
        vec![
            "/dev/md/3",
            "/dev/md/bar",
            "/dev/md/foo",
            "/dev/md0",
            "/dev/md1",
            "/dev/md2",
            "/dev/md10",
        ]
    );
}

#[test]
fn encrypted_raid_with_btrfs() {
    let mut graph = Devicegraph::new();
    let sdb = graph.create_disk("/dev/sdb", Region::new(0, 20_971_520, 512).unwrap()).unwrap();
    let sdc = graph.create_disk("/dev/sdc", Region::new(0, 20_971_520, 512).unwrap()).unwrap();

    let md = graph.create_md("/dev/md0").unwrap();
    graph.set_md_level(md, MdLevel::Raid1).unwrap();
    graph.md_add_device(md, sdb).unwrap();
    graph.md_add_device(md, sdc).unwrap();

    let name = graph.next_free_cr_auto_name();
    let luks = graph.create_luks(md, &name).unwrap();
    let btrfs = graph.create_btrfs(luks).unwrap();
    let top_level = graph.top_level_btrfs_subvolume(btrfs).unwrap();
    let home = graph.create_btrfs_subvolume(top_level, "@/home").unwrap();
    graph.check().unwrap();

    let device = BlkDevice::find_by_name(&graph, "/dev/mapper/cr-auto-1").unwrap();
    assert_eq!(device.size(), graph.find_device(md).unwrap().blk().unwrap().size() - 2 * 1024 * 1024);
    assert_eq!(graph.display_name(btrfs).unwrap(), "btrfs on /dev/mapper/cr-auto-1");

    let mut ancestors = graph.ancestors(home, false).unwrap();
    assert_eq!(ancestors[..4], [top_level, btrfs, luks, md]);
    ancestors.sort();
    assert_eq!(ancestors, vec![sdb, sdc, md, luks, btrfs, top_level]);
    assert_eq!(graph.roots(), vec![sdb, sdc]);

    let err = graph.find_btrfs_subvolume_by_path(btrfs, "@/var").unwrap_err();
    assert!(err.is_device_not_found());
}

#[test]
fn saved_graph_keeps_sids() {
    let mut graph = Devicegraph::new();
    let sda = graph.create_disk("/dev/sda", Region::new(0, 1_000_000, 512).unwrap()).unwrap();
    let sda1 = graph
        .create_partition(sda, "/dev/sda1", Region::new(2048, 500_000, 512).unwrap())
        .unwrap();
    graph.remove_device(sda1).unwrap();
    let sda2 = graph
        .create_partition(sda, "/dev/sda2", Region::new(600_000, 100_000, 512).unwrap())
        .unwrap();

    let loaded = Devicegraph::from_json(&graph.to_json().unwrap()).unwrap();
    assert_eq!(BlkDevice::find_by_name(&loaded, "/dev/sda2").unwrap().sid(), sda2);
    assert!(BlkDevice::find_by_name(&loaded, "/dev/sda1").unwrap_err().is_device_not_found());
}
