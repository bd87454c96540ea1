use ldfs::io::LDiskBuilder;
use ldfs::{FileSystem, FsConfig, IntoStatus};

pub fn main() {
    env_logger::init();

    let dev = LDiskBuilder::new()
        .build()
        .expect("Could not initialize disk.");
    let mut fs = FileSystem::format(dev, FsConfig::default()).expect("should format");

    println!("cr f1tx: {}", fs.create("f1tx").into_status());
    let slot = fs.open("f1tx").expect("should open");
    println!("op f1tx: {}", slot);

    let data: Vec<u8> = (0..100).collect();
    println!("wr 100: {}", fs.write(slot, &data, 100).into_status());
    println!("sk 23: {}", fs.lseek(slot, 23).into_status());
    let mut buf = [0; 10];
    println!("rd 10: {}", fs.read(slot, &mut buf, 10).into_status());
    println!("  {:?}", buf);

    let image = tempfile::NamedTempFile::new().unwrap();
    fs.save(image.path()).expect("should save");
    println!("sv {}", image.path().display());

    fs.destroy("f1tx").unwrap();
    println!("de f1tx, {} files left", fs.list_directory().count());

    fs.restore(image.path()).expect("should restore");
    for entry in fs.list_directory() {
        println!("dr {}", entry);
    }
}
